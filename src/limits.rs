use crate::model::{MINUTE_MS, Ms};

pub const MIN_TITLE_CHARS: usize = 3;
pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 480;
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

/// How long an existing appointment blocks its provider, regardless of its
/// stored duration.
pub const OCCUPIED_WINDOW_MS: Ms = 30 * MINUTE_MS;

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

pub const MAX_EMAIL_LEN: usize = 254;

/// 1970-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
