//! M-Pin Full three-pass authentication driver.
//!
//! Round-trips:
//!   POST /auth/pass1        { dta, mpin_id, U, UT }          -> { y }
//!   POST /auth/pass2        { mpin_id, WID, OTP, V, Z }      -> { authOTT }
//!   POST /auth/authenticate { mpinResponse: { authOTT } }    -> { T, renewSecret? }
//!
//! The derived client key is the broker's TLS pre-shared key. A
//! `renewSecret` in the final response, or in a 409 body of the same
//! shape (the only place an error payload is inspected), triggers
//! client-secret recombination from the two DTA shares; the session
//! keeps authenticating with the old identity and hands the renewed one
//! back to the caller.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use pm_crypto::mpin::{self, AuthData, Pass2Data};
use pm_crypto::Csprng;
use pm_proto::auth::{
    AuthenticateRequest, AuthenticateResponse, Cs2Response, MpinResponse, Pass1Request,
    Pass1Response, Pass2Request, Pass2Response, RenewSecret,
};
use pm_proto::Identity;

use crate::error::ClientError;
use crate::http::JsonHttpClient;

#[derive(Debug)]
pub struct AuthResult {
    /// Hash of `mpin_id`; its hex form doubles as the TLS PSK identity.
    pub client_id: Vec<u8>,
    /// 16-byte M-Pin client key, used as the TLS PSK.
    pub shared_secret: Vec<u8>,
    pub identity_changed: bool,
    pub new_identity: Option<Identity>,
}

pub struct Authenticator {
    http: JsonHttpClient,
}

impl Authenticator {
    pub fn new() -> Result<Self, ClientError> {
        Ok(Self {
            http: JsonHttpClient::new()?,
        })
    }

    pub fn authenticate(
        &self,
        rng: &mut Csprng,
        server: &str,
        identity: &Identity,
    ) -> Result<AuthResult, ClientError> {
        let mpin_id_hex = hex::encode(&identity.mpin_id);
        let client_id = mpin::hash_id(&identity.mpin_id);
        let pass1 = mpin::client1(rng, &identity.mpin_id, &identity.client_secret)?;

        debug!(server, "starting M-Pin Full exchange");
        let resp1: Pass1Response = self.post(
            &format!("{server}/auth/pass1"),
            &Pass1Request {
                dta: identity.dta_list.clone(),
                mpin_id: mpin_id_hex.clone(),
                u: hex::encode(&pass1.u),
                ut: hex::encode(&pass1.ut),
            },
        )?;

        let y = decode_wire_hex("y", &resp1.y)?;
        let v = mpin::client2(&pass1.x, &y, &pass1.sec)?;
        let (z, r) = mpin::g1_multiple(rng, &client_id)?;
        let pass2 = Pass2Data { y, v, z, r };

        let resp2: Pass2Response = self.post(
            &format!("{server}/auth/pass2"),
            &Pass2Request {
                mpin_id: mpin_id_hex,
                wid: String::new(),
                otp: false,
                v: hex::encode(&pass2.v),
                z: hex::encode(&pass2.z),
            },
        )?;

        let resp3 = self.authenticate_final(server, resp2.auth_ott)?;

        let t = decode_wire_hex("T", &resp3.t)?;
        let hm = mpin::hash_all(&client_id, &pass1, &pass2, &t);
        let precomp = mpin::precompute(&identity.client_secret, &client_id)?;
        let shared_secret = mpin::client_key(&pass1, &pass2, &AuthData { t, hm, precomp })?;

        let new_identity = match resp3.renew_secret {
            Some(ref renew) => {
                info!("auth server signalled identity expiry; recombining secret shares");
                Some(self.renew_identity(renew, identity)?)
            }
            None => None,
        };

        Ok(AuthResult {
            client_id,
            shared_secret,
            identity_changed: new_identity.is_some(),
            new_identity,
        })
    }

    /// Final pass. Some server generations answer 409 Conflict with the
    /// renewal payload instead of folding it into a 200; accept both as
    /// long as the body carries the same shape.
    fn authenticate_final(
        &self,
        server: &str,
        auth_ott: serde_json::Value,
    ) -> Result<AuthenticateResponse, ClientError> {
        let url = format!("{server}/auth/authenticate");
        let request = AuthenticateRequest {
            mpin_response: MpinResponse { auth_ott },
        };
        match self.post::<_, AuthenticateResponse>(&url, &request) {
            Ok(resp) => Ok(resp),
            Err(ClientError::Http {
                status: 409,
                ref body,
                ..
            }) => serde_json::from_str::<AuthenticateResponse>(body)
                .ok()
                .filter(|resp| resp.renew_secret.is_some())
                .ok_or_else(|| ClientError::Http {
                    method: "POST",
                    url,
                    status: 409,
                    body: body.clone(),
                }),
            Err(e) => Err(e),
        }
    }

    fn renew_identity(
        &self,
        renew: &RenewSecret,
        expired: &Identity,
    ) -> Result<Identity, ClientError> {
        let cs1 = decode_wire_hex("clientSecretShare", &renew.client_secret_share)?;
        let cs2_resp: Cs2Response = self.get(&renew.cs2url)?;
        let cs2 = decode_wire_hex("clientSecret", &cs2_resp.client_secret)?;

        let mut renewed = Identity::new(
            decode_wire_hex("mpin_id", &renew.mpin_id)?,
            mpin::recombine_g1(&cs1, &cs2)?,
            renew.dta.clone(),
        );
        // SOK keys are issued out of band and survive the renewal
        renewed.sok_send_key = expired.sok_send_key.clone();
        renewed.sok_recv_key = expired.sok_recv_key.clone();
        Ok(renewed)
    }

    fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let value = self.http.post_json(url, body)?;
        serde_json::from_value(value).map_err(|e| ClientError::Json(e.to_string()))
    }

    fn get<R: DeserializeOwned>(&self, url: &str) -> Result<R, ClientError> {
        let value = self.http.get_json(url)?;
        serde_json::from_value(value).map_err(|e| ClientError::Json(e.to_string()))
    }
}

// hexutil::decode maps malformed input to an empty buffer; none of the
// wire fields may legitimately be empty
fn decode_wire_hex(field: &str, value: &str) -> Result<Vec<u8>, ClientError> {
    let bytes = pm_proto::hexutil::decode(value);
    if bytes.is_empty() {
        return Err(ClientError::Json(format!("bad hex in {field}")));
    }
    Ok(bytes)
}
