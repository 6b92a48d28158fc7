/// Game and client constants

// Board geometry
pub const BOARD_SIZE_STANDARD: u8 = 15;
pub const BOARD_SIZE_COMPACT: u8 = 7;

// Tile values (0..=MAX)
pub const MAX_TILE_VALUE: u8 = 9;

// Placement rules
pub const ADJACENT_TARGET_SUM: u8 = 5; // neighbour + candidate
pub const SEQUENCE_MULTIPLE: u32 = 5;
pub const POINTS_PER_SEQUENCE_UNIT: u32 = 10; // score = sequence sum * 10

// Polling and caching
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 8;
pub const DEFAULT_STATE_CACHE_TTL_SECS: u64 = 4;
pub const DEFAULT_PREVIEW_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_REQUEST_DEBOUNCE_MS: u64 = 50;
pub const DEFAULT_REFRESH_BATCH_SIZE: usize = 3;
pub const DEFAULT_REFRESH_BATCH_COOLDOWN_MS: u64 = 1_000;
pub const DEFAULT_RATE_LIMIT_RETRIES: u32 = 3;
pub const RATE_LIMIT_BACKOFF_BASE_MS: u64 = 500;
pub const RATE_LIMIT_BACKOFF_MAX_MS: u64 = 8_000;

// Submission
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 1_500;

// Reconciliation
pub const DEFAULT_HIGHLIGHT_WINDOW_SECS: u64 = 6;
pub const DEFAULT_RECAP_TILE_COUNT: usize = 3;
