use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// 地球平均半径（米）
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// 1度纬度约111km
pub const METERS_PER_DEGREE: f64 = 111_000.0;

// 公共数据结构
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct MapLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl MapLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// 拒绝 NaN、无穷大以及超出范围的坐标
    pub fn validate(self) -> Result<Self, ChatError> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(ChatError::invalid("coordinates must be finite numbers"));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ChatError::invalid(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ChatError::invalid(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(self)
    }

    pub fn distance_to(&self, other: &MapLocation) -> f64 {
        calculate_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

// 使用Haversine公式计算球面距离（米）
pub fn calculate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// 近似包围盒，用于数据库预过滤。
/// 搜索圆越过极点或经度范围无法表示时返回 None，此时只按纬度过滤
pub fn bounding_box(center: &MapLocation, radius: f64) -> (f64, Option<f64>) {
    // 留出10%余量，最终以Haversine距离为准
    let lat_range = radius * 1.1 / METERS_PER_DEGREE;
    if center.latitude.abs() + lat_range >= 90.0 {
        return (lat_range, None);
    }

    let cos_lat = center.latitude.to_radians().cos();
    if cos_lat < 1e-6 {
        return (lat_range, None);
    }
    let lon_range = radius * 1.1 / (METERS_PER_DEGREE * cos_lat);
    if lon_range >= 180.0 || center.longitude.abs() + lon_range > 180.0 {
        (lat_range, None)
    } else {
        (lat_range, Some(lon_range))
    }
}
