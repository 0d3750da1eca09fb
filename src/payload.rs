//! Typed snapshot payloads and the registry that picks a decoder per type
//!
//! Snapshots are stored with their raw JSON args. When the model is
//! finalized every snapshot runs through the decoder registered for its
//! instance's type name (or, failing that, its category):
//!
//! ```text
//! raw args ──decode──▶ Raw* struct ──normalize──▶ *Payload ──validate──▶ SnapshotPayload
//! ```
//!
//! Each phase is a plain function with no side effects. Types without a
//! registered decoder keep their args as `SnapshotPayload::Opaque`.
//!
//! # Example
//!
//! ```
//! use tracemodel::payload::{PayloadRegistry, SnapshotPayload};
//! use serde_json::json;
//!
//! let registry = PayloadRegistry::with_builtin_decoders();
//! let payload = registry
//!     .initialize("cc", "cc::Tile", &json!({"contents_scale": 2.0}))
//!     .unwrap();
//! assert!(matches!(payload, SnapshotPayload::Tile(_)));
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while initializing a snapshot payload
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Failed to decode {type_name} payload: {source}")]
    Decode {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {type_name} payload: {reason}")]
    Invalid {
        type_name: &'static str,
        reason: String,
    },
}

/// Width/height pair as emitted by the compositor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Initialized snapshot data
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data")]
pub enum SnapshotPayload {
    LayerTreeHostImpl(LayerTreeHostImplPayload),
    PictureLayer(PictureLayerPayload),
    Tile(TilePayload),
    /// Args of a type nobody registered a decoder for, untouched
    Opaque(Value),
}

/// Decoder capability registered per type name or category
pub trait PayloadDecoder: Send + Sync + fmt::Debug {
    /// Run the full pipeline over raw snapshot args
    fn initialize(&self, raw: &Value) -> Result<SnapshotPayload, PayloadError>;
}

/// Decoder assembled from three pure phases
pub struct Pipeline<R, P> {
    pub type_name: &'static str,
    pub decode: fn(&Value) -> Result<R, PayloadError>,
    pub normalize: fn(R) -> P,
    pub validate: fn(&P) -> Result<(), PayloadError>,
    pub wrap: fn(P) -> SnapshotPayload,
}

impl<R, P> fmt::Debug for Pipeline<R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl<R, P> PayloadDecoder for Pipeline<R, P> {
    fn initialize(&self, raw: &Value) -> Result<SnapshotPayload, PayloadError> {
        let decoded = (self.decode)(raw)?;
        let normalized = (self.normalize)(decoded);
        (self.validate)(&normalized)?;
        Ok((self.wrap)(normalized))
    }
}

/// Fallback decoder: keeps the args as they are
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueDecoder;

impl PayloadDecoder for OpaqueDecoder {
    fn initialize(&self, raw: &Value) -> Result<SnapshotPayload, PayloadError> {
        Ok(SnapshotPayload::Opaque(raw.clone()))
    }
}

/// Registration table from type name / category to decoder
#[derive(Debug, Default, Clone)]
pub struct PayloadRegistry {
    by_type_name: HashMap<String, Arc<dyn PayloadDecoder>>,
    by_category: HashMap<String, Arc<dyn PayloadDecoder>>,
}

impl PayloadRegistry {
    /// Create a registry with no decoders; everything decodes as opaque
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the compositor decoders (`cc::LayerTreeHostImpl`,
    /// `cc::PictureLayerImpl`, `cc::Tile`)
    pub fn with_builtin_decoders() -> Self {
        let mut registry = Self::new();
        registry.register_type_name("cc::LayerTreeHostImpl", Arc::new(layer_tree_host_impl_decoder()));
        registry.register_type_name("cc::PictureLayerImpl", Arc::new(picture_layer_decoder()));
        registry.register_type_name("cc::Tile", Arc::new(tile_decoder()));
        registry
    }

    pub fn register_type_name(&mut self, type_name: impl Into<String>, decoder: Arc<dyn PayloadDecoder>) {
        self.by_type_name.insert(type_name.into(), decoder);
    }

    pub fn register_category(&mut self, category: impl Into<String>, decoder: Arc<dyn PayloadDecoder>) {
        self.by_category.insert(category.into(), decoder);
    }

    /// Decoder for an instance: exact type name first, then category, then
    /// the opaque fallback
    pub fn resolve(&self, category: &str, type_name: &str) -> Arc<dyn PayloadDecoder> {
        self.by_type_name
            .get(type_name)
            .or_else(|| self.by_category.get(category))
            .cloned()
            .unwrap_or_else(|| Arc::new(OpaqueDecoder))
    }

    pub fn initialize(&self, category: &str, type_name: &str, raw: &Value) -> Result<SnapshotPayload, PayloadError> {
        self.resolve(category, type_name).initialize(raw)
    }

    pub fn len(&self) -> usize {
        self.by_type_name.len() + self.by_category.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode_as<R: for<'de> Deserialize<'de>>(type_name: &'static str, raw: &Value) -> Result<R, PayloadError> {
    R::deserialize(raw).map_err(|source| PayloadError::Decode { type_name, source })
}

fn invalid(type_name: &'static str, reason: impl Into<String>) -> PayloadError {
    PayloadError::Invalid {
        type_name,
        reason: reason.into(),
    }
}

fn check_size(type_name: &'static str, what: &str, size: &Size) -> Result<(), PayloadError> {
    if !(size.width.is_finite() && size.height.is_finite()) || size.width < 0.0 || size.height < 0.0 {
        return Err(invalid(
            type_name,
            format!("{} must be finite and non-negative, got {}x{}", what, size.width, size.height),
        ));
    }
    Ok(())
}

/// Collect the `id_ref` targets of a list of references
fn id_refs_of(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.get("id_ref").or_else(|| v.get("idRef")))
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

// ============================================================================
// cc::LayerTreeHostImpl
// ============================================================================

const LTHI: &str = "cc::LayerTreeHostImpl";

#[derive(Debug, Clone, Deserialize)]
pub struct RawLayerTreeHostImpl {
    pub device_viewport_size: Size,
    #[serde(default)]
    pub active_tree: Option<Value>,
    #[serde(default)]
    pub pending_tree: Option<Value>,
    #[serde(default)]
    pub tiles: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerTreeHostImplPayload {
    pub device_viewport_size: Size,
    pub active_tree: Option<Value>,
    pub pending_tree: Option<Value>,
    /// Ids of the tiles referenced by this host
    pub tile_refs: Vec<String>,
}

pub fn decode_layer_tree_host_impl(raw: &Value) -> Result<RawLayerTreeHostImpl, PayloadError> {
    decode_as(LTHI, raw)
}

pub fn normalize_layer_tree_host_impl(raw: RawLayerTreeHostImpl) -> LayerTreeHostImplPayload {
    LayerTreeHostImplPayload {
        device_viewport_size: raw.device_viewport_size,
        tile_refs: id_refs_of(&raw.tiles),
        active_tree: raw.active_tree,
        pending_tree: raw.pending_tree,
    }
}

pub fn validate_layer_tree_host_impl(payload: &LayerTreeHostImplPayload) -> Result<(), PayloadError> {
    check_size(LTHI, "device_viewport_size", &payload.device_viewport_size)
}

pub fn layer_tree_host_impl_decoder() -> Pipeline<RawLayerTreeHostImpl, LayerTreeHostImplPayload> {
    Pipeline {
        type_name: LTHI,
        decode: decode_layer_tree_host_impl,
        normalize: normalize_layer_tree_host_impl,
        validate: validate_layer_tree_host_impl,
        wrap: SnapshotPayload::LayerTreeHostImpl,
    }
}

// ============================================================================
// cc::PictureLayerImpl
// ============================================================================

const PICTURE_LAYER: &str = "cc::PictureLayerImpl";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tiling {
    pub content_scale: f64,
    pub content_bounds: Size,
    #[serde(default)]
    pub num_tiles: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPictureLayer {
    pub layer_id: i64,
    pub bounds: Size,
    /// Emitted as 0/1 by older producers, as a bool by newer ones
    #[serde(default, deserialize_with = "int_or_bool")]
    pub draws_content: bool,
    #[serde(default)]
    pub ideal_contents_scale: f64,
    #[serde(default)]
    pub layer_quad: Vec<f64>,
    #[serde(default)]
    pub tilings: Vec<Tiling>,
    #[serde(default)]
    pub children: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PictureLayerPayload {
    pub layer_id: i64,
    pub bounds: Size,
    pub draws_content: bool,
    pub ideal_contents_scale: f64,
    pub layer_quad: Vec<f64>,
    /// Highest resolution first
    pub tilings: Vec<Tiling>,
    pub child_refs: Vec<String>,
}

fn int_or_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrBool {
        Bool(bool),
        Int(i64),
    }
    Ok(match IntOrBool::deserialize(deserializer)? {
        IntOrBool::Bool(b) => b,
        IntOrBool::Int(i) => i != 0,
    })
}

pub fn decode_picture_layer(raw: &Value) -> Result<RawPictureLayer, PayloadError> {
    decode_as(PICTURE_LAYER, raw)
}

pub fn normalize_picture_layer(raw: RawPictureLayer) -> PictureLayerPayload {
    let mut tilings = raw.tilings;
    tilings.sort_by(|a, b| b.content_scale.total_cmp(&a.content_scale));
    PictureLayerPayload {
        layer_id: raw.layer_id,
        bounds: raw.bounds,
        draws_content: raw.draws_content,
        ideal_contents_scale: raw.ideal_contents_scale,
        layer_quad: raw.layer_quad,
        tilings,
        child_refs: id_refs_of(&raw.children),
    }
}

pub fn validate_picture_layer(payload: &PictureLayerPayload) -> Result<(), PayloadError> {
    check_size(PICTURE_LAYER, "bounds", &payload.bounds)?;
    if !payload.layer_quad.is_empty() && payload.layer_quad.len() != 8 {
        return Err(invalid(
            PICTURE_LAYER,
            format!("layer_quad needs 8 coordinates, got {}", payload.layer_quad.len()),
        ));
    }
    if payload.ideal_contents_scale < 0.0 {
        return Err(invalid(PICTURE_LAYER, "ideal_contents_scale is negative"));
    }
    for tiling in &payload.tilings {
        if tiling.content_scale <= 0.0 {
            return Err(invalid(PICTURE_LAYER, "tiling content_scale must be positive"));
        }
        check_size(PICTURE_LAYER, "tiling content_bounds", &tiling.content_bounds)?;
    }
    Ok(())
}

pub fn picture_layer_decoder() -> Pipeline<RawPictureLayer, PictureLayerPayload> {
    Pipeline {
        type_name: PICTURE_LAYER,
        decode: decode_picture_layer,
        normalize: normalize_picture_layer,
        validate: validate_picture_layer,
        wrap: SnapshotPayload::PictureLayer,
    }
}

// ============================================================================
// cc::Tile
// ============================================================================

const TILE: &str = "cc::Tile";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawManagedState {
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub memory_state: Option<String>,
    #[serde(default)]
    pub has_resource: bool,
    #[serde(default)]
    pub is_solid_color: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTile {
    pub contents_scale: f64,
    #[serde(default)]
    pub layer_id: Option<i64>,
    #[serde(default)]
    pub managed_state: RawManagedState,
    #[serde(default)]
    pub picture_pile: Option<Value>,
    #[serde(default)]
    pub priority: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TilePayload {
    pub contents_scale: f64,
    pub layer_id: Option<i64>,
    pub resolution: Option<String>,
    pub memory_state: Option<String>,
    pub has_resource: bool,
    pub is_solid_color: bool,
    pub picture_pile_ref: Option<String>,
    pub priority: Option<Value>,
}

pub fn decode_tile(raw: &Value) -> Result<RawTile, PayloadError> {
    decode_as(TILE, raw)
}

pub fn normalize_tile(raw: RawTile) -> TilePayload {
    let picture_pile_ref = raw
        .picture_pile
        .as_ref()
        .and_then(|p| p.get("id_ref").or_else(|| p.get("idRef")))
        .and_then(Value::as_str)
        .map(str::to_string);
    TilePayload {
        contents_scale: raw.contents_scale,
        layer_id: raw.layer_id,
        resolution: raw.managed_state.resolution,
        memory_state: raw.managed_state.memory_state,
        has_resource: raw.managed_state.has_resource,
        is_solid_color: raw.managed_state.is_solid_color,
        picture_pile_ref,
        priority: raw.priority,
    }
}

pub fn validate_tile(payload: &TilePayload) -> Result<(), PayloadError> {
    if !(payload.contents_scale.is_finite() && payload.contents_scale > 0.0) {
        return Err(invalid(
            TILE,
            format!("contents_scale must be positive, got {}", payload.contents_scale),
        ));
    }
    Ok(())
}

pub fn tile_decoder() -> Pipeline<RawTile, TilePayload> {
    Pipeline {
        type_name: TILE,
        decode: decode_tile,
        normalize: normalize_tile,
        validate: validate_tile,
        wrap: SnapshotPayload::Tile,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_type_is_opaque() {
        let registry = PayloadRegistry::with_builtin_decoders();
        let raw = json!({"bytes": 1024});
        let payload = registry.initialize("v8", "v8::HeapSnapshot", &raw).unwrap();
        assert_eq!(payload, SnapshotPayload::Opaque(raw));
    }

    #[test]
    fn test_category_fallback() {
        let mut registry = PayloadRegistry::new();
        registry.register_category("cc", Arc::new(tile_decoder()));
        let payload = registry
            .initialize("cc", "cc::SomethingElse", &json!({"contents_scale": 1.0}))
            .unwrap();
        assert!(matches!(payload, SnapshotPayload::Tile(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_type_name_wins_over_category() {
        let mut registry = PayloadRegistry::new();
        registry.register_category("cc", Arc::new(OpaqueDecoder));
        registry.register_type_name("cc::Tile", Arc::new(tile_decoder()));
        let payload = registry
            .initialize("cc", "cc::Tile", &json!({"contents_scale": 1.0}))
            .unwrap();
        assert!(matches!(payload, SnapshotPayload::Tile(_)));
    }

    #[test]
    fn test_picture_layer_pipeline() {
        let raw = json!({
            "layer_id": 6,
            "bounds": {"width": 980, "height": 1625},
            "draws_content": 1,
            "ideal_contents_scale": 2,
            "layer_quad": [0, 0, 1960, 0, 1960, 3250, 0, 3250],
            "tilings": [
                {"content_scale": 0.25, "content_bounds": {"width": 245, "height": 407}, "num_tiles": 1},
                {"content_scale": 2, "content_bounds": {"width": 1960, "height": 3250}, "num_tiles": 104}
            ],
            "children": [{"id_ref": "0x7b438800"}]
        });

        let decoded = decode_picture_layer(&raw).unwrap();
        assert!(decoded.draws_content);

        let normalized = normalize_picture_layer(decoded);
        assert_eq!(normalized.tilings[0].content_scale, 2.0);
        assert_eq!(normalized.child_refs, vec!["0x7b438800".to_string()]);
        assert!(validate_picture_layer(&normalized).is_ok());
    }

    #[test]
    fn test_picture_layer_rejects_short_quad() {
        let raw = json!({
            "layer_id": 1,
            "bounds": {"width": 1, "height": 1},
            "layer_quad": [0, 0, 1]
        });
        let err = picture_layer_decoder().initialize(&raw).unwrap_err();
        assert!(matches!(err, PayloadError::Invalid { .. }));
        assert!(err.to_string().contains("8 coordinates"));
    }

    #[test]
    fn test_decode_error_names_type() {
        let err = tile_decoder().initialize(&json!({"no_scale": true})).unwrap_err();
        assert!(matches!(err, PayloadError::Decode { type_name: "cc::Tile", .. }));
    }

    #[test]
    fn test_tile_normalize_flattens_managed_state() {
        let raw = json!({
            "contents_scale": 2,
            "managed_state": {
                "resolution": "HIGH_RESOLUTION",
                "memory_state": "USING_RELEASABLE_MEMORY",
                "has_resource": true
            },
            "picture_pile": {"id_ref": "0x7aa6ac10"}
        });
        let tile = normalize_tile(decode_tile(&raw).unwrap());
        assert_eq!(tile.resolution.as_deref(), Some("HIGH_RESOLUTION"));
        assert!(tile.has_resource);
        assert_eq!(tile.picture_pile_ref.as_deref(), Some("0x7aa6ac10"));
    }

    #[test]
    fn test_tile_rejects_zero_scale() {
        let tile = normalize_tile(decode_tile(&json!({"contents_scale": 0})).unwrap());
        assert!(validate_tile(&tile).is_err());
    }

    #[test]
    fn test_layer_tree_host_impl_collects_tile_refs() {
        let raw = json!({
            "device_viewport_size": {"width": 1756, "height": 1604},
            "active_tree": {"root_layer": {"id_ref": "0x7b438200"}},
            "tiles": [{"id_ref": "0x7b878a20"}, {"id_ref": "0x79ea4930"}]
        });
        let payload = layer_tree_host_impl_decoder().initialize(&raw).unwrap();
        match payload {
            SnapshotPayload::LayerTreeHostImpl(lthi) => {
                assert_eq!(lthi.tile_refs.len(), 2);
                assert_eq!(lthi.device_viewport_size.width, 1756.0);
                assert!(lthi.pending_tree.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_layer_tree_host_impl_rejects_negative_viewport() {
        let raw = json!({"device_viewport_size": {"width": -1, "height": 10}});
        assert!(layer_tree_host_impl_decoder().initialize(&raw).is_err());
    }
}
