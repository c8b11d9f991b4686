/// Fully-qualified method paths of the authentication service
pub const LOGIN_PATH: &str = "/strongbox.v1.AuthService/Login";
pub const REGISTRATION_PATH: &str = "/strongbox.v1.AuthService/Registration";

/// Fully-qualified method paths of the vault service
pub const GET_USER_DATA_LIST_PATH: &str = "/strongbox.v1.VaultService/GetUserDataList";
pub const GET_DATA_PATH: &str = "/strongbox.v1.VaultService/GetData";
pub const SAVE_DATA_PATH: &str = "/strongbox.v1.VaultService/SaveData";
pub const UPDATE_DATA_PATH: &str = "/strongbox.v1.VaultService/UpdateData";
pub const DELETE_DATA_PATH: &str = "/strongbox.v1.VaultService/DeleteData";

/// Liveness check, outside the RPC namespace
pub const HEALTH_PATH: &str = "/health";

/// Call metadata carrying the session token
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Call metadata carrying the claimed owner id
pub const USER_UID_HEADER: &str = "useruid";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Transfer chunk size used by both client upload and server read (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Default upper bound for one frame on the wire (100 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Size of the big-endian length prefix in front of every frame
pub const FRAME_HEADER_SIZE: usize = 4;

/// Session token entropy in bytes (256 bits)
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Default session validity window in seconds (20 minutes)
pub const DEFAULT_SESSION_TTL_SECS: i64 = 20 * 60;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
