use core::fmt;
use std::time::{Duration, SystemTime};

/// Width of the timestamp-offset field, in bits.
pub const TIMESTAMP_BITS: u32 = 41;

/// Width of the node identity field, in bits.
pub const NODE_ID_BITS: u32 = 10;

/// Width of the per-tick sequence field, in bits.
pub const SEQUENCE_BITS: u32 = 12;

/// Largest sequence value a single tick can hold (4095).
pub const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// Largest timestamp offset, in milliseconds (roughly 69 years).
pub const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;

/// Largest node identity (1023).
pub const MAX_NODE_ID: u64 = (1 << NODE_ID_BITS) - 1;

/// Number of bits to shift the node identity to its position (bit 12).
pub const NODE_ID_SHIFT: u32 = SEQUENCE_BITS;

/// Number of bits to shift the timestamp offset to its position (bit 22).
pub const TIMESTAMP_SHIFT: u32 = NODE_ID_BITS + SEQUENCE_BITS;

/// Packs the three fields into a raw 64-bit identifier.
///
/// The layout, most significant bit first:
///
/// ```text
///  Bit Index:  63           63 62            22 21                12 11             0
///              +--------------+----------------+--------------------+---------------+
///  Field:      | reserved (1) | timestamp (41) | node identity (10) | sequence (12) |
///              +--------------+----------------+--------------------+---------------+
///              |<------------ MSB ------------ 64 bits ------------ LSB ------------>|
/// ```
///
/// No range checks are performed; callers hand in already validated values.
///
/// # Example
///
/// ```
/// use flakepipe::{pack, Sid};
///
/// let id = pack(101, 1023, 999);
/// let sid = Sid::decode(id);
/// assert_eq!(sid.timestamp(), 101);
/// assert_eq!(sid.node_id(), 1023);
/// assert_eq!(sid.sequence(), 999);
/// ```
#[inline]
pub const fn pack(timestamp: u64, node_id: u64, sequence: u64) -> u64 {
    debug_assert!(timestamp <= MAX_TIMESTAMP, "timestamp overflow");
    debug_assert!(node_id <= MAX_NODE_ID, "node_id overflow");
    debug_assert!(sequence <= MAX_SEQUENCE, "sequence overflow");
    (timestamp << TIMESTAMP_SHIFT) | (node_id << NODE_ID_SHIFT) | sequence
}

/// The decoded form of a packed identifier.
///
/// A `Sid` is only ever produced by [`Sid::decode`], which is total: every
/// `u64` decodes, including values no generator would produce. Callers that
/// need semantic validity must check the fields themselves.
///
/// With the `serde` feature a `Sid` serializes as its raw integer and
/// deserializes through [`Sid::decode`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "u64", into = "u64"))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Sid {
    id: u64,
    timestamp: u64,
    node_id: u64,
    sequence: u64,
}

impl Sid {
    /// Splits a raw identifier into its fields.
    pub const fn decode(id: u64) -> Self {
        Self {
            id,
            timestamp: id >> TIMESTAMP_SHIFT,
            node_id: (id >> NODE_ID_SHIFT) & MAX_NODE_ID,
            sequence: id & MAX_SEQUENCE,
        }
    }

    /// The raw packed identifier.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Milliseconds between the start epoch and the tick this id belongs to.
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub const fn node_id(&self) -> u64 {
        self.node_id
    }

    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the UTC instant this identifier claims to have been generated
    /// at: `start_epoch + timestamp`.
    ///
    /// Under [`ClockMode::Virtual`] this is "start epoch plus elapsed virtual
    /// ticks", which only matches wall-clock time when production is paced
    /// to real time.
    ///
    /// [`ClockMode::Virtual`]: crate::ClockMode::Virtual
    pub fn generate_time(&self, start_epoch: SystemTime) -> SystemTime {
        start_epoch + Duration::from_millis(self.timestamp)
    }

    /// Returns the ID as a zero-padded 20-digit string.
    pub fn to_padded_string(&self) -> String {
        format!("{:020}", self.id)
    }
}

impl From<u64> for Sid {
    fn from(id: u64) -> Self {
        Self::decode(id)
    }
}

impl From<Sid> for u64 {
    fn from(sid: Sid) -> Self {
        sid.id
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
