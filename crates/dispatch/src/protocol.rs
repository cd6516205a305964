//! Driver channel wire format
//!
//! Every frame is a JSON text message tagged by `type`. Unknown fields are
//! ignored so older and newer driver clients can share one endpoint.

use chrono::{DateTime, Utc};
use common::{Location, OfferId, RideId, VehicleType};
use serde::{Deserialize, Serialize};

use crate::domain::RideOffer;
use crate::error::Result;

/// Frames sent by driver clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Auth { token: String },
    RideResponse { ride_id: RideId, accepted: bool },
    LocationUpdate { latitude: f64, longitude: f64 },
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Auth { .. } => "auth",
            InboundMessage::RideResponse { .. } => "ride_response",
            InboundMessage::LocationUpdate { .. } => "location_update",
        }
    }
}

/// Why an offer stopped being valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// Another driver took the ride
    Matched,
    /// The offer window closed without a winner
    Timeout,
}

/// The `ride_offer` payload as seen by the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideOfferPayload {
    pub offer_id: OfferId,
    pub ride_id: RideId,
    pub ride_number: String,
    pub pickup_location: Location,
    pub destination_location: Location,
    pub ride_type: VehicleType,
    pub estimated_fare: f64,
    pub driver_earnings: f64,
    pub distance_to_pickup_km: f64,
    pub expires_at: DateTime<Utc>,
}

impl From<&RideOffer> for RideOfferPayload {
    fn from(offer: &RideOffer) -> Self {
        Self {
            offer_id: offer.offer_id,
            ride_id: offer.ride_id.clone(),
            ride_number: offer.ride_number.clone(),
            pickup_location: offer.pickup_location.clone(),
            destination_location: offer.destination_location.clone(),
            ride_type: offer.ride_type,
            estimated_fare: offer.estimated_fare,
            driver_earnings: offer.driver_earnings,
            distance_to_pickup_km: offer.distance_to_pickup_km,
            expires_at: offer.expires_at,
        }
    }
}

/// Frames sent to driver clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    AuthSuccess,
    RideOffer(RideOfferPayload),
    OfferExpired {
        offer_id: OfferId,
        ride_id: RideId,
        reason: ExpiryReason,
    },
    RideDetails {
        ride_id: RideId,
        message: String,
    },
}

impl OutboundMessage {
    pub fn offer(offer: &RideOffer) -> Self {
        OutboundMessage::RideOffer(RideOfferPayload::from(offer))
    }

    pub fn expired(offer: &RideOffer, reason: ExpiryReason) -> Self {
        OutboundMessage::OfferExpired {
            offer_id: offer.offer_id,
            ride_id: offer.ride_id.clone(),
            reason,
        }
    }

    pub fn ride_details(ride_id: &RideId) -> Self {
        OutboundMessage::RideDetails {
            ride_id: ride_id.clone(),
            message: "Ride accepted, proceed to pickup location".to_string(),
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// An item on a connection's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFrame {
    Message(OutboundMessage),
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    #[test]
    fn test_parse_inbound_frames() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"auth","token":"abc"}"#).unwrap(),
            InboundMessage::Auth {
                token: "abc".to_string()
            }
        );

        let msg = InboundMessage::parse(
            r#"{"type":"ride_response","ride_id":"ride-7","offer_id":"x","accepted":true}"#,
        )
        .unwrap();
        assert_matches!(msg, InboundMessage::RideResponse { accepted: true, .. });
        assert_eq!(msg.kind(), "ride_response");

        assert!(InboundMessage::parse(r#"{"type":"dance"}"#).is_err());
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[test]
    fn test_outbound_frames_are_type_tagged() {
        let text = OutboundMessage::AuthSuccess.to_text().unwrap();
        assert_eq!(text, r#"{"type":"auth_success"}"#);

        let details: Value =
            serde_json::from_str(&OutboundMessage::ride_details(&RideId::new("r-1")).to_text().unwrap())
                .unwrap();
        assert_eq!(details["type"], "ride_details");
        assert_eq!(details["ride_id"], "r-1");

        let expired = OutboundMessage::OfferExpired {
            offer_id: OfferId::new(),
            ride_id: RideId::new("r-1"),
            reason: ExpiryReason::Timeout,
        };
        let value: Value = serde_json::from_str(&expired.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], json!("offer_expired"));
        assert_eq!(value["reason"], json!("timeout"));
    }
}
