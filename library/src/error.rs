use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("Invalid payload: {0}")]
    Validation(String),
    #[error("Missing capabilities: {}", .0.join(", "))]
    Capability(Vec<String>),
    #[error("Graph error: {0}")]
    Graph(String),
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),
    #[error("Ambiguous deploy roots: {}", .0.join(", "))]
    AmbiguousRoots(Vec<String>),
    #[error("No resolvable targets: {0}")]
    NoTargets(String),
    #[error("Export error: {0}")]
    Export(String),
    #[error("Local-only media requires a display client: {0}")]
    LocalOnlyMedia(String),
    #[error("Client identity mismatch: payload bound to {expected}, this client is {actual}")]
    Identity { expected: String, actual: String },
    #[error("Loop error: {0}")]
    Loop(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl LibraryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LibraryError::Validation(msg.into())
    }

    pub fn graph(msg: impl Into<String>) -> Self {
        LibraryError::Graph(msg.into())
    }

    pub fn export(msg: impl Into<String>) -> Self {
        LibraryError::Export(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        LibraryError::Runtime(msg.into())
    }
}
