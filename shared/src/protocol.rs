/// UDP port the game listens and answers on
pub const GAME_PORT: u16 = 2360;

/// HTTP paths exposed by the daemon
pub const PATH_SERVER: &str = "/GetServer";
pub const PATH_RESET_IS_LOADING: &str = "/ResetIsLoading";
pub const PATH_SERVER_LIST: &str = "/GetServerList";

/// Default HTTP listen address
pub const DEFAULT_API_LISTEN: &str = "0.0.0.0:8080";
