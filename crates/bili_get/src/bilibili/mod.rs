use anyhow::{bail, ensure, Result};

pub use client::{CachedFetcher, Client, PageHeaders};
pub use error::BiliError;
pub use quality::{ProfileTable, StreamProfile};
pub use video::Bilibili;

mod analyzer;
mod client;
mod error;
mod page;
mod quality;
mod url;
mod video;

pub(crate) trait Validate {
    type Output;

    fn validate(self) -> Result<Self::Output>;
}

impl Validate for serde_json::Value {
    type Output = serde_json::Value;

    fn validate(self) -> Result<Self::Output> {
        let (code, msg) = match (self["code"].as_i64(), self["message"].as_str()) {
            (Some(code), Some(msg)) => (code, msg),
            _ => bail!("no code or message found"),
        };
        ensure!(code == 0, BiliError::RequestFailed(code, msg.to_owned()));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_validate() {
        assert!(json!({"code": 0, "message": "0", "data": {}}).validate().is_ok());
        let err = json!({"code": -404, "message": "啥都木有"}).validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BiliError>(),
            Some(BiliError::RequestFailed(-404, _))
        ));
        assert!(json!({"data": {}}).validate().is_err());
    }
}
