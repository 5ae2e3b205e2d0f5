/// Header (or handshake field) carrying the shared secret on every request.
pub const TOKEN_HEADER: &str = "X-Wakamiti-Token";

/// The only control message a streaming client may send.
pub const STOP_MESSAGE: &str = "STOP";

/// `tracing` target used for command output.
///
/// Events on this target are what streaming clients see.
pub const OUTPUT_TARGET: &str = "waka::output";

/// File name of the persisted secret inside the system directory.
pub const TOKEN_FILE_NAME: &str = "head.token";

pub const DEFAULT_PORT: u16 = 7264;

pub const EXEC_PATH: &str = "/exec";
pub const EXEC_STREAM_PATH: &str = "/exec/out";
pub const HEALTH_PATH: &str = "/health";

/// Directory under the user's local data dir holding service state.
pub const SYSTEM_DIR_NAME: &str = "wakamiti";
