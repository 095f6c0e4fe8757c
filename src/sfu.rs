//! The SFU media engine seam.
//!
//! The coordinator never touches RTP/RTCP/ICE itself; it talks to a router
//! through [`SfuRouter`] and forwards the minted parameters to clients
//! verbatim. [`EmbeddedRouter`] is the in-process implementation backing the
//! server, tests, and the load simulator.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::ids::{ConsumerId, ProducerId, TransportId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// What a producer carries, beyond its RTP kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerSource {
    Webcam,
    Screen,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    pub role: String,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Codec/encoding detail is opaque to the coordinator; it moves between the
/// router and clients untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RtpCapabilities(pub serde_json::Value);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RtpParameters(pub serde_json::Value);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Error)]
pub enum SfuError {
    #[error("unknown transport {0}")]
    UnknownTransport(TransportId),
    #[error("unknown producer {0}")]
    UnknownProducer(ProducerId),
    #[error("unknown consumer {0}")]
    UnknownConsumer(ConsumerId),
    #[error("transport {0} is not connected")]
    TransportNotConnected(TransportId),
}

/// The router + transport API a room's SFU exposes to the coordinator.
#[async_trait]
pub trait SfuRouter: Send + Sync {
    /// Router capabilities clients load their device against.
    fn rtp_capabilities(&self) -> RtpCapabilities;

    async fn create_transport(&self) -> Result<TransportParams, SfuError>;

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls: DtlsParameters,
    ) -> Result<(), SfuError>;

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SfuError>;

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        _rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerParams, SfuError>;

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SfuError>;

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), SfuError>;

    /// Mints fresh ICE parameters for the transport; the old ones stop
    /// working once the client applies the new ones.
    async fn restart_ice(&self, transport_id: &TransportId) -> Result<IceParameters, SfuError>;

    async fn close_transport(&self, transport_id: &TransportId);
}

struct TransportEntry {
    connected: bool,
}

struct ProducerEntry {
    transport_id: TransportId,
    kind: MediaKind,
}

struct ConsumerEntry {
    producer_id: ProducerId,
    paused: bool,
}

/// In-process router that mints parameters and tracks object lifetimes
/// without moving any media. One instance per room.
pub struct EmbeddedRouter {
    transports: DashMap<TransportId, TransportEntry>,
    producers: DashMap<ProducerId, ProducerEntry>,
    consumers: DashMap<ConsumerId, ConsumerEntry>,
}

impl EmbeddedRouter {
    pub fn new() -> Self {
        EmbeddedRouter {
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
        }
    }

    fn mint_ice_parameters() -> IceParameters {
        let mut rng = rand::thread_rng();
        let ufrag: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let password: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        IceParameters {
            username_fragment: ufrag,
            password,
            ice_lite: true,
        }
    }

    fn mint_candidates() -> Vec<IceCandidate> {
        let port = rand::thread_rng().gen_range(40_000..50_000);
        vec![IceCandidate {
            foundation: "udpcandidate".to_string(),
            priority: 1_076_302_079,
            ip: "127.0.0.1".to_string(),
            port,
            protocol: "udp".to_string(),
        }]
    }

    fn mint_dtls_parameters() -> DtlsParameters {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        let value = bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        DtlsParameters {
            role: "auto".to_string(),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value,
            }],
        }
    }
}

impl Default for EmbeddedRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SfuRouter for EmbeddedRouter {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities(json!({
            "codecs": [
                {
                    "mimeType": "audio/opus",
                    "kind": "audio",
                    "clockRate": 48_000,
                    "channels": 2,
                    "parameters": { "minptime": 10, "useinbandfec": 1 }
                },
                {
                    "mimeType": "video/VP8",
                    "kind": "video",
                    "clockRate": 90_000
                },
                {
                    "mimeType": "video/H264",
                    "kind": "video",
                    "clockRate": 90_000,
                    "parameters": {
                        "level-asymmetry-allowed": 1,
                        "packetization-mode": 1,
                        "profile-level-id": "42e01f"
                    }
                }
            ],
            "headerExtensions": [
                "urn:ietf:params:rtp-hdrext:sdes:mid",
                "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
                "urn:3gpp:video-orientation"
            ]
        }))
    }

    async fn create_transport(&self) -> Result<TransportParams, SfuError> {
        let id = TransportId::from(Uuid::new_v4().to_string());
        self.transports
            .insert(id.clone(), TransportEntry { connected: false });
        Ok(TransportParams {
            id,
            ice_parameters: Self::mint_ice_parameters(),
            ice_candidates: Self::mint_candidates(),
            dtls_parameters: Self::mint_dtls_parameters(),
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        _dtls: DtlsParameters,
    ) -> Result<(), SfuError> {
        let mut entry = self
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| SfuError::UnknownTransport(transport_id.clone()))?;
        entry.connected = true;
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        _rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SfuError> {
        let entry = self
            .transports
            .get(transport_id)
            .ok_or_else(|| SfuError::UnknownTransport(transport_id.clone()))?;
        if !entry.connected {
            return Err(SfuError::TransportNotConnected(transport_id.clone()));
        }
        drop(entry);
        let id = ProducerId::from(Uuid::new_v4().to_string());
        self.producers.insert(
            id.clone(),
            ProducerEntry {
                transport_id: transport_id.clone(),
                kind,
            },
        );
        Ok(id)
    }

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        _rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerParams, SfuError> {
        if !self.transports.contains_key(transport_id) {
            return Err(SfuError::UnknownTransport(transport_id.clone()));
        }
        let kind = self
            .producers
            .get(producer_id)
            .map(|p| p.kind)
            .ok_or_else(|| SfuError::UnknownProducer(producer_id.clone()))?;
        let id = ConsumerId::from(Uuid::new_v4().to_string());
        self.consumers.insert(
            id.clone(),
            ConsumerEntry {
                producer_id: producer_id.clone(),
                paused: true,
            },
        );
        Ok(ConsumerParams {
            id,
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters: RtpParameters(json!({ "mid": id_suffix(producer_id) })),
        })
    }

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SfuError> {
        let mut entry = self
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| SfuError::UnknownConsumer(consumer_id.clone()))?;
        entry.paused = false;
        Ok(())
    }

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), SfuError> {
        if self.producers.remove(producer_id).is_none() {
            return Err(SfuError::UnknownProducer(producer_id.clone()));
        }
        // Consumers outlive their producer by at most this sweep.
        let stale: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|e| &e.value().producer_id == producer_id)
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            self.consumers.remove(&id);
        }
        Ok(())
    }

    async fn restart_ice(&self, transport_id: &TransportId) -> Result<IceParameters, SfuError> {
        if !self.transports.contains_key(transport_id) {
            return Err(SfuError::UnknownTransport(transport_id.clone()));
        }
        Ok(Self::mint_ice_parameters())
    }

    async fn close_transport(&self, transport_id: &TransportId) {
        self.transports.remove(transport_id);
        let owned: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|e| &e.value().transport_id == transport_id)
            .map(|e| e.key().clone())
            .collect();
        for id in owned {
            let _ = self.close_producer(&id).await;
        }
    }
}

fn id_suffix(id: &ProducerId) -> String {
    let raw = id.as_ref();
    raw[raw.len().saturating_sub(8)..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transport_lifecycle() {
        let router = EmbeddedRouter::new();
        let transport = router.create_transport().await.unwrap();
        assert!(!transport.ice_parameters.username_fragment.is_empty());
        assert_eq!(transport.dtls_parameters.fingerprints.len(), 1);

        // produce before connect is refused
        let err = router
            .produce(&transport.id, MediaKind::Audio, RtpParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::TransportNotConnected(_)));

        router
            .connect_transport(&transport.id, transport.dtls_parameters.clone())
            .await
            .unwrap();
        let producer = router
            .produce(&transport.id, MediaKind::Audio, RtpParameters::default())
            .await
            .unwrap();
        assert!(router.close_producer(&producer).await.is_ok());
    }

    #[tokio::test]
    async fn test_consume_follows_producer_lifetime() {
        let router = EmbeddedRouter::new();
        let send = router.create_transport().await.unwrap();
        router
            .connect_transport(&send.id, send.dtls_parameters.clone())
            .await
            .unwrap();
        let recv = router.create_transport().await.unwrap();

        let producer = router
            .produce(&send.id, MediaKind::Video, RtpParameters::default())
            .await
            .unwrap();
        let consumer = router
            .consume(&recv.id, &producer, RtpCapabilities::default())
            .await
            .unwrap();
        assert_eq!(consumer.kind, MediaKind::Video);
        router.resume_consumer(&consumer.id).await.unwrap();

        router.close_producer(&producer).await.unwrap();
        // consumer went with its producer
        let err = router.resume_consumer(&consumer.id).await.unwrap_err();
        assert!(matches!(err, SfuError::UnknownConsumer(_)));
    }

    #[tokio::test]
    async fn test_restart_ice_mints_fresh_parameters() {
        let router = EmbeddedRouter::new();
        let transport = router.create_transport().await.unwrap();
        let fresh = router.restart_ice(&transport.id).await.unwrap();
        assert_ne!(fresh, transport.ice_parameters);

        let missing = TransportId::from("missing");
        assert!(router.restart_ice(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_close_transport_cascades() {
        let router = EmbeddedRouter::new();
        let send = router.create_transport().await.unwrap();
        router
            .connect_transport(&send.id, send.dtls_parameters.clone())
            .await
            .unwrap();
        let producer = router
            .produce(&send.id, MediaKind::Audio, RtpParameters::default())
            .await
            .unwrap();

        router.close_transport(&send.id).await;
        let err = router.close_producer(&producer).await.unwrap_err();
        assert!(matches!(err, SfuError::UnknownProducer(_)));
    }
}
