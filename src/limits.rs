/// Longest block accepted, in weeks (ten years).
pub const MAX_DURATION_WEEKS: u32 = 520;

pub const MAX_NAME_LEN: usize = 256;

pub const MAX_TAGS: usize = 32;

pub const MAX_TAG_LEN: usize = 64;

/// Splits add blocks, so the store caps each subject independently.
pub const MAX_BLOCKS_PER_SUBJECT: usize = 4096;
