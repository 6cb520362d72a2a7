//! Speech transcoding endpoint: abstract contract and HTTP implementation.

use std::io::Read;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};

use crate::audio::encode_wav;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// How the endpoint delivered its audio reply.
pub enum TranscodeReply {
    /// Whole payload, already base64-decoded from a JSON body.
    Payload(Vec<u8>),
    /// Raw byte stream; chunks can reach playback before the body ends.
    Stream(Box<dyn Read>),
}

/// The one contract the relay needs from the remote service. The concrete
/// backend schema stays behind this seam.
pub trait TranscodeEndpoint: Send + Sync {
    /// Ship one WAV-framed segment and return the synthesized reply audio.
    fn transcode(&self, wav: &[u8]) -> Result<TranscodeReply>;

    /// Cheap reachability check; any answer counts, including non-2xx.
    fn probe(&self) -> Result<()>;

    /// First-run model spin-up. May take a long time on a cold backend.
    fn warm_up(&self) -> Result<()>;
}

/// `TranscodeEndpoint` over plain HTTP POST with a base64 WAV JSON body.
pub struct HttpEndpoint {
    agent: ureq::Agent,
    url: String,
    model: String,
    probe_timeout: Duration,
    warmup_sample_rate: u32,
}

impl HttpEndpoint {
    pub fn new(config: &RelayConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.request_timeout_secs)))
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self {
            agent,
            url: config.endpoint_url.clone(),
            model: config.model.clone(),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            warmup_sample_rate: config.target_sample_rate,
        }
    }
}

impl TranscodeEndpoint for HttpEndpoint {
    fn transcode(&self, wav: &[u8]) -> Result<TranscodeReply> {
        let payload = serde_json::json!({
            "model": self.model,
            "audio": general_purpose::STANDARD.encode(wav),
            "response_mode": "audio",
        });

        let resp = self
            .agent
            .post(&self.url)
            .send_json(payload)
            .map_err(|e| RelayError::EndpointUnreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .into_body()
                .read_to_string()
                .unwrap_or_default()
                .chars()
                .take(300)
                .collect();
            return Err(RelayError::Transcode {
                status: Some(status.as_u16()),
                detail,
            });
        }

        let is_json = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("application/json"))
            .unwrap_or(false);

        if is_json {
            let body: serde_json::Value =
                resp.into_body().read_json().map_err(|e| RelayError::Transcode {
                    status: None,
                    detail: format!("malformed JSON body: {e}"),
                })?;
            let b64 = body
                .get("response")
                .and_then(|v| v.as_str())
                .ok_or_else(|| RelayError::Transcode {
                    status: None,
                    detail: "no `response` field in JSON body".to_string(),
                })?;
            let bytes = general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| RelayError::Transcode {
                    status: None,
                    detail: format!("invalid base64 payload: {e}"),
                })?;
            Ok(TranscodeReply::Payload(bytes))
        } else {
            Ok(TranscodeReply::Stream(Box::new(
                resp.into_body().into_reader(),
            )))
        }
    }

    fn probe(&self) -> Result<()> {
        // Dedicated short-timeout agent; the shared one is tuned for long
        // transcode round-trips.
        let probe_agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.probe_timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();
        match probe_agent.get(&self.url).call() {
            Ok(_) => Ok(()),
            Err(e) => Err(RelayError::EndpointUnreachable(e.to_string())),
        }
    }

    fn warm_up(&self) -> Result<()> {
        // The contract has no dedicated warm-up verb; a ~100ms silent blip
        // makes the backend page the model in, and the reply is discarded.
        let blip = vec![0.0f32; (self.warmup_sample_rate / 10) as usize];
        let wav = encode_wav(&blip, self.warmup_sample_rate);
        match self.transcode(&wav) {
            Ok(_) => Ok(()),
            Err(e) => Err(RelayError::ModelWarmup(e.to_string())),
        }
    }
}
