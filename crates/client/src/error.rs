use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("base url must not be empty"))]
    MissingBaseUrl { stage: &'static str },
    #[snafu(display("unauthorized on `{stage}`: {reason}"))]
    Unauthorized {
        stage: &'static str,
        reason: &'static str,
    },
    #[snafu(display("server returned status {status} on `{stage}`: {body}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("http request failed on `{stage}`, {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode response body on `{stage}`, {source}"))]
    DecodeBody {
        stage: &'static str,
        source: serde_json::Error,
    },
}

impl ClientError {
    /// Returns true when the credential was missing or rejected by the server.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingBaseUrl { stage }
            | Self::Unauthorized { stage, .. }
            | Self::HttpStatus { stage, .. }
            | Self::Request { stage, .. }
            | Self::DecodeBody { stage, .. } => stage,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
