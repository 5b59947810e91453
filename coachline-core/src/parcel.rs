use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::Commuter;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParcelStatus {
    Requested,
    Found,
    NotFound,
    HandedOver,
}

wire_enum!(ParcelStatus, "parcelStatus", {
    Requested => "REQUESTED",
    Found => "FOUND",
    NotFound => "NOT_FOUND",
    HandedOver => "HANDED_OVER",
});

/// A commuter's report of an item left on a bus, keyed by the ticket used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LostParcel {
    pub parcel_id: i64,
    pub reference_id: String,
    pub e_ticket: String,
    pub booking_id: i64,
    #[serde(rename = "type")]
    pub parcel_type: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ParcelStatus,
    pub commuter: Option<Commuter>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
