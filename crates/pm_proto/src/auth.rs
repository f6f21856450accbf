//! Auth-server wire bodies. These map directly to JSON on the wire;
//! binary members are lowercase hex.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct Pass1Request {
    pub dta: Vec<String>,
    pub mpin_id: String,
    #[serde(rename = "U")]
    pub u: String,
    #[serde(rename = "UT")]
    pub ut: String,
}

#[derive(Debug, Deserialize)]
pub struct Pass1Response {
    pub y: String,
}

#[derive(Debug, Serialize)]
pub struct Pass2Request {
    pub mpin_id: String,
    #[serde(rename = "WID")]
    pub wid: String,
    #[serde(rename = "OTP")]
    pub otp: bool,
    #[serde(rename = "V")]
    pub v: String,
    #[serde(rename = "Z")]
    pub z: String,
}

#[derive(Debug, Deserialize)]
pub struct Pass2Response {
    /// Opaque one-time token, echoed back verbatim in the final pass.
    #[serde(rename = "authOTT")]
    pub auth_ott: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct AuthenticateRequest {
    #[serde(rename = "mpinResponse")]
    pub mpin_response: MpinResponse,
}

#[derive(Debug, Serialize)]
pub struct MpinResponse {
    #[serde(rename = "authOTT")]
    pub auth_ott: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateResponse {
    #[serde(rename = "T")]
    pub t: String,
    #[serde(rename = "renewSecret")]
    pub renew_secret: Option<RenewSecret>,
}

/// Identity-expiry payload. The server includes it when the presented
/// mpin_id has aged out; the client recombines the two DTA shares into a
/// fresh client secret and hands the new identity to the application.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewSecret {
    pub mpin_id: String,
    pub dta: Vec<String>,
    #[serde(rename = "clientSecretShare")]
    pub client_secret_share: String,
    pub cs2url: String,
}

#[derive(Debug, Deserialize)]
pub struct Cs2Response {
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass1_request_uses_wire_member_names() {
        let req = Pass1Request {
            dta: vec!["dta1".into()],
            mpin_id: "7b7d".into(),
            u: "0401".into(),
            ut: "0402".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["U"], "0401");
        assert_eq!(json["UT"], "0402");
        assert_eq!(json["mpin_id"], "7b7d");
    }

    #[test]
    fn pass2_request_pins_wid_and_otp() {
        let req = Pass2Request {
            mpin_id: "7b7d".into(),
            wid: String::new(),
            otp: false,
            v: "04".into(),
            z: "04".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["WID"], "");
        assert_eq!(json["OTP"], false);
    }

    #[test]
    fn authenticate_response_parses_optional_renew_secret() {
        let plain: AuthenticateResponse = serde_json::from_str("{\"T\":\"0403\"}").unwrap();
        assert!(plain.renew_secret.is_none());

        let renewing: AuthenticateResponse = serde_json::from_str(
            "{\"T\":\"0403\",\"renewSecret\":{\"mpin_id\":\"7b7d\",\"dta\":[\"a\"],\
             \"clientSecretShare\":\"0404\",\"cs2url\":\"https://dta2/share\"}}",
        )
        .unwrap();
        let renew = renewing.renew_secret.unwrap();
        assert_eq!(renew.cs2url, "https://dta2/share");
        assert_eq!(renew.client_secret_share, "0404");
    }
}
