use serde::{Deserialize, Serialize};

use crate::chat::NearbyPeer;
use crate::common::MapLocation;

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&UpdateLocationRequest> for MapLocation {
    fn from(req: &UpdateLocationRequest) -> Self {
        MapLocation::new(req.latitude, req.longitude)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateLocationResponse {
    /// 聊天半径内的用户，包含自己
    pub nearby: Vec<NearbyPeer>,
}
