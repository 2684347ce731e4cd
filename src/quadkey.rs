//! Quadkey derivation for the point-to-region crosswalk.
//!
//! Quadkeys identify Web Mercator tiles in the Bing Maps tile system: one
//! base-4 digit per zoom level, so tiles that share a parent share a key
//! prefix.

use std::f64::consts::PI;

/// Latitude bounds of the Web Mercator projection
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Deepest level supported by the tile system
pub const MAX_ZOOM: u8 = 23;

/// Zoom level the crosswalk is keyed at
pub const DEFAULT_ZOOM: u8 = 19;

const TILE_SIZE: u64 = 256;

/// Tile column/row at a zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileXY {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

/// Convert a coordinate to its tile at `zoom`.
///
/// Coordinates outside the projection are clipped to its bounds and the zoom
/// is capped at [`MAX_ZOOM`]. Returns `None` for non-finite coordinates.
pub fn to_tile(lat: f64, lon: f64, zoom: u8) -> Option<TileXY> {
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    let zoom = zoom.min(MAX_ZOOM);
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let lon = lon.clamp(MIN_LON, MAX_LON);

    let x = (lon + 180.0) / 360.0;
    let sin_lat = (lat * PI / 180.0).sin();
    let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI);

    let map_size = (TILE_SIZE << zoom) as f64;
    let pixel_x = (x * map_size + 0.5).clamp(0.0, map_size - 1.0) as u64;
    let pixel_y = (y * map_size + 0.5).clamp(0.0, map_size - 1.0) as u64;

    Some(TileXY {
        x: (pixel_x / TILE_SIZE) as u32,
        y: (pixel_y / TILE_SIZE) as u32,
        zoom,
    })
}

/// Encode a tile as a quadkey string
pub fn tile_to_quadkey(tile: TileXY) -> String {
    let mut key = String::with_capacity(tile.zoom as usize);
    for level in (1..=tile.zoom).rev() {
        let mask = 1u32 << (level - 1);
        let mut digit = b'0';
        if tile.x & mask != 0 {
            digit += 1;
        }
        if tile.y & mask != 0 {
            digit += 2;
        }
        key.push(digit as char);
    }
    key
}

/// Quadkey of the tile containing a coordinate
pub fn from_geo(lat: f64, lon: f64, zoom: u8) -> Option<String> {
    to_tile(lat, lon, zoom).map(tile_to_quadkey)
}
