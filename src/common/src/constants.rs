pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024 * 1024;

// Keeps "<name>.chunk<i>.<tag>" under the 255 byte file name limit of the volumes.
pub const MAX_FILENAME_ENC_LEN: usize = 200;
pub const MAX_CHUNK_ID_LEN: usize = 250;
pub const CHUNK_TOKEN_TAG_LEN: usize = 16;

pub const CHUNK_DIR_NAME: &str = "chunks";
pub const TMP_DIR_NAME: &str = "tmp";

pub const FILE_KEY_PREFIX: &str = "file";
pub const NODE_KEY_PREFIX: &str = "node";

pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";
pub const CHUNK_ID_HEADER: &str = "x-chunk-id";
pub const CHUNK_COUNT_HEADER: &str = "x-chunk-count";
