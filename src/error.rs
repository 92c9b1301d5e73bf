/// Error raised when a [topology](crate::Topology) is not structurally valid.
#[derive(thiserror::Error, Debug)]
pub enum TopologyError {
    #[error("topology is empty")]
    Empty,

    #[error("layer {index} must be an input layer, found `{found}`")]
    MissingInput { index: usize, found: String },

    #[error("layer {index} must be a regression layer, found `{found}`")]
    MissingRegression { index: usize, found: String },

    #[error("layer {index} (`{name}`): {field} must be greater than zero")]
    ZeroSize {
        index: usize,
        name: String,
        field: &'static str,
    },

    #[error("layer {index} (`{name}`): keep probability {keep_prob} is outside (0, 1]")]
    KeepProbability {
        index: usize,
        name: String,
        keep_prob: f64,
    },

    #[error("layer {index} (`{name}`): learning rate {learning_rate} must be finite and positive")]
    LearningRate {
        index: usize,
        name: String,
        learning_rate: f64,
    },

    #[error("layer {index} (`{name}`): {field} = {value} is invalid")]
    InvalidParameter {
        index: usize,
        name: String,
        field: &'static str,
        value: f64,
    },

    #[error("layer {index} (`{name}`): {field} of {dims:?} overflows usize")]
    Overflow {
        index: usize,
        name: String,
        field: &'static str,
        dims: [usize; 3],
    },

    #[error("layer {index} (`{name}`) is not supported at this position")]
    Unsupported { index: usize, name: String },

    #[error("no fully-connected layer precedes the regression layer {index}")]
    MissingOutput { index: usize },

    #[error("Serde error: {0}")]
    Json(#[from] serde_json::Error),
}
