use thiserror::Error;

#[derive(Error, Debug)]
pub enum BiliError {
    #[error("request failed, status code: {0}, message: {1}")]
    RequestFailed(i64, String),
    #[error("marker {0} not found in page")]
    MarkerNotFound(&'static str),
    #[error("unexpected format of the {0} url")]
    UrlFormat(&'static str),
    #[error("unsupported resource type: {0}")]
    Unsupported(&'static str),
    #[error("no stream information available")]
    NoStreamInfo,
}
