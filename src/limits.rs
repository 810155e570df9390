//! Open file limit handling.
//!
//! Every in-flight probe holds one socket, so the concurrency cap has to fit
//! under the soft `NOFILE` limit with room left for the process itself.
use log::info;

/// Descriptors kept free for stdio, the DNS resolver and the runtime.
pub const RESERVED_DESCRIPTORS: u64 = 100;

/// Below this limit the cap is halved instead of trimmed.
const SMALL_FILE_LIMIT: u64 = 2 * RESERVED_DESCRIPTORS;

/// Raises the soft and hard open file limit to `limit`.
#[cfg(unix)]
pub fn raise_ulimit(limit: u64) -> std::io::Result<()> {
    rlimit::Resource::NOFILE.set(limit, limit)?;
    info!("Open file limit raised to {limit}");
    Ok(())
}

/// Current soft open file limit.
#[cfg(unix)]
pub fn current_ulimit() -> std::io::Result<u64> {
    let (soft, _) = rlimit::Resource::NOFILE.get()?;
    Ok(soft)
}

/// How the requested concurrency compares with the open file limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// The cap fits under the limit.
    Fits(usize),
    /// The cap was lowered to the contained value.
    Lowered(usize),
}

impl Fit {
    pub const fn value(self) -> usize {
        match self {
            Self::Fits(value) | Self::Lowered(value) => value,
        }
    }
}

/// Lowers `requested` when it would not fit under `ulimit`.
///
/// Large limits keep [`RESERVED_DESCRIPTORS`] free, small ones are halved.
/// The result is never below one.
pub fn infer_concurrency(requested: usize, ulimit: u64) -> Fit {
    let wanted = requested as u64;
    if wanted + RESERVED_DESCRIPTORS <= ulimit {
        return Fit::Fits(requested);
    }

    let lowered = if ulimit < SMALL_FILE_LIMIT {
        info!("Halving concurrency because the open file limit is small");
        ulimit / 2
    } else {
        ulimit - RESERVED_DESCRIPTORS
    };
    let lowered = usize::try_from(lowered.clamp(1, wanted)).unwrap_or(requested);
    Fit::Lowered(lowered)
}
