//! Query status codes
//!
//! A status is a bit set: one high level bit (success, failure or in
//! progress) combined with any number of detail bits, so that a caller can
//! test e.g. "success with a partial result" in one value.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use navmesh_common::Error;

/// Result type for query operations. The error side always carries
/// [`Status::FAILURE`].
pub type QueryResult<T> = std::result::Result<T, Status>;

/// Failure returned for rejected arguments
pub(crate) const INVALID_INPUT: Status = Status::failure(Status::INVALID_PARAM);

/// Combinable status bits returned by query operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u32);

// High level status flags
impl Status {
    /// Operation failed
    pub const FAILURE: Status = Status(1 << 31);
    /// Operation succeeded
    pub const SUCCESS: Status = Status(1 << 30);
    /// Operation still in progress
    pub const IN_PROGRESS: Status = Status(1 << 29);

    const DETAIL_MASK: u32 = 0x0ff_ffff;
}

// Detail information
impl Status {
    /// Input data is not recognized
    pub const WRONG_MAGIC: Status = Status(1 << 0);
    /// Input data is in wrong version
    pub const WRONG_VERSION: Status = Status(1 << 1);
    /// Operation ran out of memory
    pub const OUT_OF_MEMORY: Status = Status(1 << 2);
    /// An input parameter was invalid
    pub const INVALID_PARAM: Status = Status(1 << 3);
    /// Result buffer for the query was too small to store all results
    pub const BUFFER_TOO_SMALL: Status = Status(1 << 4);
    /// Query ran out of nodes during search
    pub const OUT_OF_NODES: Status = Status(1 << 5);
    /// Query did not reach the end location, returning best guess
    pub const PARTIAL_RESULT: Status = Status(1 << 6);
    /// A tile has already been assigned to the given x,y coordinate
    pub const ALREADY_OCCUPIED: Status = Status(1 << 7);
}

impl Status {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Failure status carrying the given detail bits
    pub const fn failure(detail: Status) -> Self {
        Self(Self::FAILURE.0 | detail.0)
    }

    /// Returns true if every bit of `other` is set
    pub const fn contains(self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_success(self) -> bool {
        self.0 & Self::SUCCESS.0 != 0
    }

    pub const fn is_failure(self) -> bool {
        self.0 & Self::FAILURE.0 != 0
    }

    pub const fn is_in_progress(self) -> bool {
        self.0 & Self::IN_PROGRESS.0 != 0
    }

    pub const fn is_partial(self) -> bool {
        self.0 & Self::PARTIAL_RESULT.0 != 0
    }

    pub const fn is_buffer_too_small(self) -> bool {
        self.0 & Self::BUFFER_TOO_SMALL.0 != 0
    }

    pub const fn is_out_of_nodes(self) -> bool {
        self.0 & Self::OUT_OF_NODES.0 != 0
    }

    pub const fn is_invalid_param(self) -> bool {
        self.0 & Self::INVALID_PARAM.0 != 0
    }

    /// Detail bits only
    pub const fn detail(self) -> Status {
        Self(self.0 & Self::DETAIL_MASK)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "Success")?;
        } else if self.is_failure() {
            write!(f, "Failure")?;
        } else if self.is_in_progress() {
            write!(f, "In Progress")?;
        }

        const DETAILS: [(Status, &str); 8] = [
            (Status::WRONG_MAGIC, "Wrong Magic"),
            (Status::WRONG_VERSION, "Wrong Version"),
            (Status::OUT_OF_MEMORY, "Out of Memory"),
            (Status::INVALID_PARAM, "Invalid Param"),
            (Status::BUFFER_TOO_SMALL, "Buffer Too Small"),
            (Status::OUT_OF_NODES, "Out of Nodes"),
            (Status::PARTIAL_RESULT, "Partial Result"),
            (Status::ALREADY_OCCUPIED, "Already Occupied"),
        ];

        let details: Vec<&str> = DETAILS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }

        Ok(())
    }
}

impl std::error::Error for Status {}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidParam(_) | Error::InvalidMesh(_) => Status::failure(Status::INVALID_PARAM),
            Error::WrongMagic(_) => Status::failure(Status::WRONG_MAGIC),
            Error::WrongVersion { .. } => Status::failure(Status::WRONG_VERSION),
            Error::AlreadyOccupied { .. } => Status::failure(Status::ALREADY_OCCUPIED),
            Error::OutOfTiles => Status::failure(Status::OUT_OF_MEMORY),
        }
    }
}
