use crate::model::Minutes;

pub const MAX_CUSTOMERS: usize = 100_000;
pub const MAX_APPOINTMENTS: usize = 1_000_000;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_PHONE_LEN: usize = 15;

pub const MAX_SERVICES: usize = 1_000;
pub const MAX_SERVICE_CODE_LEN: usize = 64;
pub const MAX_BLOCKS_PER_SERVICE: usize = 32;
/// Applies to catalog blocks and direct appointments alike.
pub const MAX_BLOCK_MINUTES: Minutes = 24 * 60;

/// Duration used when a direct appointment omits one.
pub const DEFAULT_APPOINTMENT_MINUTES: Minutes = 60;

pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9000;
