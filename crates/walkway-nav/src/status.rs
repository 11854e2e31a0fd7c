//! Query status codes.
//!
//! A status carries three orthogonal bits (success/failure, in-progress,
//! partial) plus a detail reason. "Partial" is not a failure: a truncated
//! path is still usable, so callers must check it explicitly.

/// Why a status is what it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusDetail {
    /// Nothing notable.
    #[default]
    None,
    /// A query found nothing within its search volume.
    NotFound,
    /// A parameter failed validation (null ref, stale salt, bad extent).
    InvalidParam,
    /// The node pool filled up mid-search.
    OutOfNodes,
    /// The caller-supplied capacity truncated the result.
    BufferTooSmall,
    /// The reachability table proved the goal unreachable.
    Unreachable,
    /// Tile data did not start with the expected magic tag.
    WrongMagic,
    /// Tile data version is not supported.
    WrongVersion,
    /// All tile slots are occupied.
    OutOfTiles,
    /// A tile is already registered at the target location.
    AlreadyExists,
}

const SUCCESS: u8 = 1 << 0;
const FAILURE: u8 = 1 << 1;
const IN_PROGRESS: u8 = 1 << 2;
const PARTIAL: u8 = 1 << 3;

/// Result descriptor for query operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    bits: u8,
    /// Detail reason accompanying the bits.
    pub detail: StatusDetail,
}

impl Status {
    /// Plain success.
    pub const fn success() -> Self {
        Self {
            bits: SUCCESS,
            detail: StatusDetail::None,
        }
    }

    /// Success with a partial result.
    pub const fn partial() -> Self {
        Self {
            bits: SUCCESS | PARTIAL,
            detail: StatusDetail::None,
        }
    }

    /// Failure with a detail reason.
    pub const fn failure(detail: StatusDetail) -> Self {
        Self {
            bits: FAILURE,
            detail,
        }
    }

    /// A sliced operation that has not finished yet.
    pub const fn in_progress() -> Self {
        Self {
            bits: IN_PROGRESS,
            detail: StatusDetail::None,
        }
    }

    /// Attaches a detail reason.
    pub const fn with_detail(mut self, detail: StatusDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Marks the result partial, keeping the success bit.
    pub const fn with_partial(mut self) -> Self {
        self.bits |= PARTIAL;
        self
    }

    /// The operation completed successfully (possibly partially).
    pub const fn is_success(&self) -> bool {
        self.bits & SUCCESS != 0
    }

    /// The operation failed outright.
    pub const fn is_failure(&self) -> bool {
        self.bits & FAILURE != 0
    }

    /// The operation is still running (sliced queries).
    pub const fn is_in_progress(&self) -> bool {
        self.bits & IN_PROGRESS != 0
    }

    /// The result was truncated before reaching the exact goal.
    pub const fn is_partial(&self) -> bool {
        self.bits & PARTIAL != 0
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.is_in_progress() {
            "in progress"
        } else if self.is_failure() {
            "failure"
        } else if self.is_partial() {
            "partial success"
        } else {
            "success"
        };
        match self.detail {
            StatusDetail::None => write!(f, "{state}"),
            detail => write!(f, "{state} ({detail:?})"),
        }
    }
}

impl std::error::Error for Status {}
