//! The per-tile LOD reconciliation engine.
//!
//! A [`Tile`] is polled twice per frame by its terrain:
//!
//! - **cull pass** ([`Tile::service_cull_traversal`]): may run on any thread,
//!   in parallel across tiles. Installs the tile's per-layer slots on first
//!   visit and keeps in-flight requests alive by refreshing their stamps.
//! - **update pass** ([`Tile::service_update_traversal`]): single-threaded.
//!   Registers the tile on first visit, drains completed requests into the
//!   layer records, issues the next refinement per layer, and swaps in
//!   regenerated geometry.
//!
//! # Per-layer state machine
//!
//! ```text
//!   NONE ──placeholder──► PLACEHOLDER(lod) ──placeholder──► ... ──final──► FINAL(tile lod)
//!     │                                                                      ▲
//!     └─────────────────────────────── final ────────────────────────────────┘
//! ```
//!
//! A layer's LOD never decreases and never exceeds the tile's own LOD.
//! Refinement is gated by [`next_refinement`]. Final requests that keep
//! failing are retried up to the configured cap, after which the tile
//! relabels whatever it holds as final and stops asking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::bound::{compute_bound, heightfield_bound, Bound};
use super::family::{Family, FamilyCell};
use super::layers::{LayerKind, TileLayers};
use super::readiness::{next_refinement, BlockReason, Refinement};
use super::requests::{self, ElevationRequest, ImageryRequest, TileGenRequest};
use super::update::{CompiledGeometry, TileUpdate, UpdateQueue};
use crate::coord::TileKey;
use crate::executor::{
    elevation_priority, imagery_priority, LoadingMode, RequestState, TaskRequest,
    TaskService,
};
use crate::map::{ImageLayerInfo, LayerUid, MapFrame};
use crate::terrain::TerrainContext;

// =============================================================================
// Request Slots
// =============================================================================

#[derive(Default)]
struct ElevationSlot {
    final_request: Option<Arc<ElevationRequest>>,
    placeholder: Option<Arc<ElevationRequest>>,
    exhausted: bool,
}

#[derive(Default)]
struct ImagerySlot {
    request: Option<Arc<ImageryRequest>>,
    exhausted: bool,
}

struct Regeneration {
    request: Arc<TileGenRequest>,
    batch: Vec<TileUpdate>,
}

/// Type-erased handle over the tile's differently-typed requests.
trait InFlight {
    fn cancel(&self);
    fn is_running(&self) -> bool;
    fn set_stamp(&self, stamp: i64);
}

impl<T: Send + 'static> InFlight for TaskRequest<T> {
    fn cancel(&self) {
        TaskRequest::cancel(self)
    }

    fn is_running(&self) -> bool {
        TaskRequest::is_running(self)
    }

    fn set_stamp(&self, stamp: i64) {
        TaskRequest::set_stamp(self, stamp)
    }
}

#[derive(Default)]
struct TileState {
    /// Terrain revision the slots were installed for.
    terrain_revision: Option<u64>,
    /// Bumped on every change to the tile's layer records.
    tile_revision: u64,
    elevation: ElevationSlot,
    imagery: BTreeMap<LayerUid, ImagerySlot>,
    regeneration: Option<Regeneration>,
    updates: UpdateQueue,
    elevation_up_to_date: bool,
    dynamic_hint: bool,
    /// Set once the tile is being evicted.
    canceled: bool,
}

impl TileState {
    fn requests(&self) -> Vec<&dyn InFlight> {
        let mut requests: Vec<&dyn InFlight> = Vec::new();
        if let Some(r) = self.elevation.final_request.as_deref() {
            requests.push(r);
        }
        if let Some(r) = self.elevation.placeholder.as_deref() {
            requests.push(r);
        }
        for slot in self.imagery.values() {
            if let Some(r) = slot.request.as_deref() {
                requests.push(r);
            }
        }
        if let Some(regeneration) = &self.regeneration {
            requests.push(regeneration.request.as_ref());
        }
        requests
    }
}

// =============================================================================
// Tile
// =============================================================================

/// One terrain tile and its reconciliation state.
pub struct Tile {
    key: TileKey,
    layers: Arc<TileLayers>,
    family: FamilyCell,
    state: Mutex<TileState>,
    traversed: AtomicBool,
    update_hint: AtomicI32,
    geometry: RwLock<Option<Arc<CompiledGeometry>>>,
    vertical_scale: f32,
}

impl Tile {
    /// Creates an unregistered tile.
    ///
    /// The update-traversal hint starts at 1 so the tile is guaranteed one
    /// update visit, in which it registers with the terrain.
    pub fn new(key: TileKey, vertical_scale: f32) -> Self {
        Self {
            key,
            layers: Arc::new(TileLayers::new()),
            family: FamilyCell::default(),
            state: Mutex::new(TileState::default()),
            traversed: AtomicBool::new(false),
            update_hint: AtomicI32::new(1),
            geometry: RwLock::new(None),
            vertical_scale,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn layers(&self) -> &Arc<TileLayers> {
        &self.layers
    }

    pub fn family(&self) -> Arc<Family> {
        self.family.load()
    }

    /// Replaces the family snapshot. Returns false if nothing changed.
    pub fn set_family(&self, family: Family) -> bool {
        self.family.store(family)
    }

    pub fn is_traversed(&self) -> bool {
        self.traversed.load(Ordering::Acquire)
    }

    /// Number of update traversals this tile is asking for.
    pub fn update_traversal_hint(&self) -> i32 {
        self.update_hint.load(Ordering::Relaxed)
    }

    /// The geometry currently live in the scene.
    pub fn geometry(&self) -> Option<Arc<CompiledGeometry>> {
        self.geometry.read().clone()
    }

    pub fn tile_revision(&self) -> u64 {
        self.state.lock().tile_revision
    }

    pub fn terrain_revision(&self) -> Option<u64> {
        self.state.lock().terrain_revision
    }

    /// True once final elevation at the tile's own LOD is installed, or the
    /// tile sits at or above the terrain's first LOD.
    pub fn elevation_up_to_date(&self) -> bool {
        self.state.lock().elevation_up_to_date
    }

    pub fn elevation_lod(&self) -> i32 {
        self.layers.elevation_lod()
    }

    pub fn color_lod(&self, uid: LayerUid) -> i32 {
        self.layers.color_lod(uid)
    }

    /// Elevation LOD and per-layer imagery LODs.
    pub fn resolution(&self) -> (i32, BTreeMap<LayerUid, i32>) {
        (self.layers.elevation_lod(), self.layers.color_lods())
    }

    pub fn pending_updates(&self) -> usize {
        self.state.lock().updates.len()
    }

    pub fn compute_bound(&self) -> Bound {
        compute_bound(&self.layers.snapshot(), self.vertical_scale)
    }

    /// True when no request owned by the tile is queued or executing.
    pub fn requests_quiescent(&self) -> bool {
        self.state
            .lock()
            .requests()
            .iter()
            .all(|request| !request.is_running())
    }

    // =========================================================================
    // Traversals
    // =========================================================================

    /// Cull-pass visit: installs slots on first call and refreshes the stamp
    /// of every in-flight request.
    pub fn service_cull_traversal(&self, ctx: &dyn TerrainContext, frame: &MapFrame, stamp: i64) {
        let mut state = self.state.lock();
        if state.canceled {
            return;
        }
        if state.terrain_revision.is_none() {
            self.install(ctx, frame, &mut state, ctx.revision());
        }
        for request in state.requests() {
            if request.is_running() {
                request.set_stamp(stamp);
            }
        }
    }

    /// Update-pass visit. Returns true if the tile's live geometry changed.
    pub fn service_update_traversal(
        &self,
        ctx: &dyn TerrainContext,
        frame: &MapFrame,
        stamp: i64,
    ) -> bool {
        let mut state = self.state.lock();
        if state.canceled {
            return false;
        }
        self.traverse_update(ctx, &mut state);
        if state.terrain_revision.is_none() {
            self.install(ctx, frame, &mut state, ctx.revision());
        }

        // Compiled geometry is judged against updates from earlier passes
        // only, before this pass installs anything new
        let changed = self.drain_regeneration(ctx, &mut state, stamp);

        self.discard_deleted_layers(ctx, frame, &mut state);

        let family = self.family.load();
        if frame.has_elevation() {
            self.service_elevation(ctx, &mut state, &family, stamp);
        }
        for layer in frame.image_layers() {
            self.service_imagery(ctx, &mut state, &family, layer, stamp);
        }

        self.dispatch_regeneration(ctx, &mut state, stamp);
        changed
    }

    /// Cancels every request the tile owns and stops issuing new ones.
    ///
    /// Returns the number of requests canceled. Requests that are queued or
    /// executing observe the cancellation through their token; the caller
    /// keeps the tile alive until [`requests_quiescent`](Self::requests_quiescent).
    pub fn cancel_all_requests(&self) -> usize {
        let mut state = self.state.lock();
        state.canceled = true;
        let requests = state.requests();
        for request in &requests {
            request.cancel();
        }
        debug!(tile = %self.key, canceled = requests.len(), "Canceled all tile requests");
        requests.len()
    }

    /// Brings the tile up to a new terrain configuration revision.
    ///
    /// Requests and records of layers no longer in the map are dropped, slots
    /// are installed for new layers and every retry cap is lifted. Requests
    /// for layers that are still present keep running. Returns false if the
    /// tile was already current.
    pub fn apply_configuration_revision(
        &self,
        ctx: &dyn TerrainContext,
        frame: &MapFrame,
        revision: u64,
    ) -> bool {
        let mut state = self.state.lock();
        if state.canceled || state.terrain_revision == Some(revision) {
            return false;
        }

        self.discard_deleted_layers(ctx, frame, &mut state);
        if !frame.has_elevation() {
            self.withdraw_elevation(ctx, &mut state);
        }
        state.elevation.exhausted = false;
        for slot in state.imagery.values_mut() {
            slot.exhausted = false;
        }

        let removed = self.layers.retain_colors(|uid| frame.contains_layer(uid));
        if removed > 0 {
            self.layer_changed(&mut state, TileUpdate::Rebuild);
        }
        self.install(ctx, frame, &mut state, revision);

        debug!(tile = %self.key, revision, removed, "Applied configuration revision");
        true
    }

    // =========================================================================
    // Installation
    // =========================================================================

    fn install(&self, ctx: &dyn TerrainContext, frame: &MapFrame, state: &mut TileState, revision: u64) {
        state.terrain_revision = Some(revision);
        for layer in frame.image_layers() {
            state.imagery.entry(layer.uid).or_default();
        }
        if self.key.lod <= ctx.config().first_lod {
            state.elevation_up_to_date = true;
        }

        let dynamic = frame.has_dynamic_layers();
        if dynamic != state.dynamic_hint {
            state.dynamic_hint = dynamic;
            if dynamic {
                self.update_hint.fetch_add(1, Ordering::Relaxed);
            } else {
                self.update_hint.fetch_sub(1, Ordering::Relaxed);
            }
        }
        trace!(tile = %self.key, revision, "Tile installed");
    }

    /// First-visit registration. Takes the state guard to prove the tile
    /// lock is held.
    fn traverse_update(&self, ctx: &dyn TerrainContext, _state: &mut TileState) {
        if self.traversed.load(Ordering::Acquire) {
            return;
        }
        self.traversed.store(true, Ordering::Release);
        self.update_hint.fetch_sub(1, Ordering::Relaxed);
        ctx.register_traversed(&self.key);
        trace!(tile = %self.key, "Tile registered");
    }

    fn withdraw_elevation(&self, ctx: &dyn TerrainContext, state: &mut TileState) {
        let service = ctx.elevation_service();
        for request in [
            state.elevation.final_request.take(),
            state.elevation.placeholder.take(),
        ]
        .into_iter()
        .flatten()
        {
            request.cancel();
            service.withdraw(request.id());
        }
    }

    fn discard_deleted_layers(&self, ctx: &dyn TerrainContext, frame: &MapFrame, state: &mut TileState) {
        let deleted: Vec<LayerUid> = state
            .imagery
            .keys()
            .copied()
            .filter(|uid| !frame.contains_layer(*uid))
            .collect();

        for uid in deleted {
            let Some(request) = state.imagery.remove(&uid).and_then(|slot| slot.request) else {
                continue;
            };
            request.cancel();
            if let Some(service) = ctx.imagery_service(uid) {
                service.withdraw(request.id());
            }
            ctx.metrics().stale_result_discarded();
            debug!(tile = %self.key, uid, "Layer no longer in map, discarding request");
        }
    }

    fn layer_changed(&self, state: &mut TileState, update: TileUpdate) {
        state.tile_revision += 1;
        state.updates.push(update);
    }

    /// The queue samples the priority when the request is enqueued, so a
    /// queued request keeps it until it is resubmitted.
    fn submit<T: Send + 'static>(
        &self,
        ctx: &dyn TerrainContext,
        service: &dyn TaskService,
        request: &Arc<TaskRequest<T>>,
        priority: f32,
        stamp: i64,
    ) {
        request.set_priority(priority);
        request.set_stamp(stamp);
        if service.submit(request.clone()) {
            ctx.metrics().request_submitted();
            trace!(tile = %self.key, request = request.name(), priority, "Request submitted");
        }
    }

    // =========================================================================
    // Elevation
    // =========================================================================

    fn service_elevation(
        &self,
        ctx: &dyn TerrainContext,
        state: &mut TileState,
        family: &Family,
        stamp: i64,
    ) {
        if let Some(request) = state.elevation.final_request.clone() {
            match request.state() {
                RequestState::Running => {
                    request.set_stamp(stamp);
                    return;
                }
                RequestState::Completed => {
                    self.complete_final_elevation(ctx, state, &request);
                    return;
                }
                RequestState::Idle => {}
            }
        }

        if let Some(request) = state.elevation.placeholder.clone() {
            match request.state() {
                RequestState::Running => {
                    request.set_stamp(stamp);
                    return;
                }
                RequestState::Completed => {
                    self.complete_placeholder_elevation(ctx, state, &request);
                    return;
                }
                RequestState::Idle => state.elevation.placeholder = None,
            }
        }

        if state.elevation.exhausted {
            return;
        }

        let tile_lod = self.key.level();
        let current = self.layers.elevation_lod();
        let priority = elevation_priority(self.key.lod);
        match next_refinement(tile_lod, current, family, LayerKind::Elevation) {
            Refinement::Blocked(reason) => {
                trace!(tile = %self.key, %reason, "Elevation refinement blocked");
            }
            Refinement::Final => {
                let request = state
                    .elevation
                    .final_request
                    .get_or_insert_with(|| Arc::new(requests::final_elevation(self.key, ctx.factory())))
                    .clone();
                self.submit(ctx, ctx.elevation_service().as_ref(), &request, priority, stamp);
            }
            Refinement::Placeholder { derived_lod } => {
                let Some(parent) = self.key.parent().and_then(|k| ctx.tile(&k)) else {
                    return;
                };
                let Some(parent_elevation) = parent.layers().elevation() else {
                    return;
                };
                let derived_lod = derived_lod.min(parent_elevation.lod);
                if derived_lod <= current {
                    return;
                }
                let request = Arc::new(requests::placeholder_elevation(
                    self.key,
                    ctx.factory(),
                    parent_elevation.heightfield,
                    derived_lod,
                ));
                self.submit(ctx, ctx.elevation_service().as_ref(), &request, priority, stamp);
                state.elevation.placeholder = Some(request);
            }
        }
    }

    fn complete_final_elevation(
        &self,
        ctx: &dyn TerrainContext,
        state: &mut TileState,
        request: &Arc<ElevationRequest>,
    ) {
        let metrics = ctx.metrics();
        if request.was_canceled() {
            request.reset();
            metrics.request_canceled();
            trace!(tile = %self.key, "Elevation request canceled, will retry");
            return;
        }

        let tile_lod = self.key.level();
        match request.take_result() {
            Some(mut layer) => {
                if let Some(locator) = layer.locator {
                    let mut heightfield = (*layer.heightfield).clone();
                    let bound = heightfield_bound(&heightfield, &locator, self.vertical_scale);
                    if bound.is_valid() {
                        heightfield.set_skirt_height(bound.radius as f32 * ctx.config().skirt_ratio);
                    }
                    layer.heightfield = Arc::new(heightfield);
                }
                layer.lod = tile_lod;
                self.layers.set_elevation(layer);
                state.elevation.final_request = None;
                state.elevation_up_to_date = true;
                self.layer_changed(state, TileUpdate::Elevation);
                metrics.final_installed();
                debug!(tile = %self.key, lod = tile_lod, "Final elevation installed");
            }
            None => {
                let attempts = request.attempts();
                if ctx.config().retry_policy().is_exhausted(attempts) {
                    state.elevation.final_request = None;
                    state.elevation.exhausted = true;
                    metrics.retry_exhausted();
                    if self.layers.relabel_elevation(tile_lod) {
                        self.layer_changed(state, TileUpdate::Elevation);
                    }
                    warn!(tile = %self.key, attempts, "Elevation retries exhausted, keeping existing data");
                } else {
                    request.reset();
                    metrics.retry_scheduled();
                    debug!(tile = %self.key, attempts, "Elevation request failed, retrying");
                }
            }
        }
    }

    fn complete_placeholder_elevation(
        &self,
        ctx: &dyn TerrainContext,
        state: &mut TileState,
        request: &Arc<ElevationRequest>,
    ) {
        state.elevation.placeholder = None;
        if request.was_canceled() {
            ctx.metrics().request_canceled();
            return;
        }
        let Some(layer) = request.take_result() else {
            return;
        };
        // Elevation is accepted in LOD order only
        if layer.lod <= self.layers.elevation_lod() {
            return;
        }
        let lod = layer.lod;
        self.layers.set_elevation(layer);
        self.layer_changed(state, TileUpdate::Elevation);
        ctx.metrics().placeholder_installed();
        debug!(tile = %self.key, lod, "Placeholder elevation installed");
    }

    // =========================================================================
    // Imagery
    // =========================================================================

    fn service_imagery(
        &self,
        ctx: &dyn TerrainContext,
        state: &mut TileState,
        family: &Family,
        layer: &ImageLayerInfo,
        stamp: i64,
    ) {
        let uid = layer.uid;
        let mode = ctx.config().loading_mode;
        let priority = imagery_priority(mode, self.key.lod);

        let slot = state.imagery.entry(uid).or_default();
        if let Some(request) = slot.request.clone() {
            match request.state() {
                RequestState::Running => {
                    request.set_stamp(stamp);
                    return;
                }
                RequestState::Completed => {
                    self.complete_final_imagery(ctx, state, uid, &request);
                    return;
                }
                RequestState::Idle => {}
            }
        }
        if slot.exhausted {
            return;
        }

        let tile_lod = self.key.level();
        let current = self.layers.color_lod(uid);
        let refinement = match mode {
            LoadingMode::Preemptive if current < tile_lod => Refinement::Final,
            LoadingMode::Preemptive => Refinement::Blocked(BlockReason::AlreadyFinal),
            LoadingMode::Sequential => next_refinement(tile_lod, current, family, LayerKind::Image(uid)),
        };

        match refinement {
            Refinement::Blocked(reason) => {
                trace!(tile = %self.key, uid, %reason, "Imagery refinement blocked");
            }
            Refinement::Final => {
                let Some(service) = ctx.imagery_service(uid) else {
                    debug!(tile = %self.key, uid, "No service for image layer");
                    return;
                };
                let request = slot
                    .request
                    .get_or_insert_with(|| {
                        Arc::new(requests::final_imagery(self.key, layer.clone(), ctx.factory()))
                    })
                    .clone();
                self.submit(ctx, service.as_ref(), &request, priority, stamp);
            }
            Refinement::Placeholder { derived_lod } => {
                let Some(parent) = self.key.parent().and_then(|k| ctx.tile(&k)) else {
                    return;
                };
                let Some(parent_color) = parent.layers().color(uid) else {
                    return;
                };
                let derived_lod = derived_lod.min(parent_color.lod);
                if derived_lod <= current {
                    return;
                }
                self.layers.set_color(parent_color.relabeled(derived_lod));
                self.layer_changed(state, TileUpdate::ImageLayer(uid));
                ctx.metrics().placeholder_installed();
                debug!(tile = %self.key, uid, lod = derived_lod, "Imagery placeholder adopted from parent");
            }
        }
    }

    fn complete_final_imagery(
        &self,
        ctx: &dyn TerrainContext,
        state: &mut TileState,
        uid: LayerUid,
        request: &Arc<ImageryRequest>,
    ) {
        let metrics = ctx.metrics();
        if request.was_canceled() {
            request.reset();
            metrics.request_canceled();
            trace!(tile = %self.key, uid, "Imagery request canceled, will retry");
            return;
        }

        let tile_lod = self.key.level();
        match request.take_result() {
            Some(mut color) => {
                color.lod = tile_lod;
                self.layers.set_color(color);
                if let Some(slot) = state.imagery.get_mut(&uid) {
                    slot.request = None;
                }
                self.layer_changed(state, TileUpdate::ImageLayer(uid));
                metrics.final_installed();
                debug!(tile = %self.key, uid, lod = tile_lod, "Final imagery installed");
            }
            None => {
                let attempts = request.attempts();
                if ctx.config().retry_policy().is_exhausted(attempts) {
                    if let Some(slot) = state.imagery.get_mut(&uid) {
                        slot.request = None;
                        slot.exhausted = true;
                    }
                    metrics.retry_exhausted();
                    if let Some(existing) = self.layers.color(uid) {
                        self.layers.set_color(existing.relabeled(tile_lod));
                        self.layer_changed(state, TileUpdate::ImageLayer(uid));
                    }
                    warn!(tile = %self.key, uid, attempts, "Imagery retries exhausted, keeping existing image");
                } else {
                    request.reset();
                    metrics.retry_scheduled();
                    debug!(tile = %self.key, uid, attempts, "Imagery request failed, retrying");
                }
            }
        }
    }

    // =========================================================================
    // Geometry Regeneration
    // =========================================================================

    /// Applies a finished compile if no update arrived since it was
    /// dispatched, otherwise folds its batch back into the pending queue.
    fn drain_regeneration(&self, ctx: &dyn TerrainContext, state: &mut TileState, stamp: i64) -> bool {
        let Some(Regeneration { request, batch }) = state.regeneration.take() else {
            return false;
        };
        let metrics = ctx.metrics();
        match request.state() {
            RequestState::Running => {
                request.set_stamp(stamp);
                state.regeneration = Some(Regeneration { request, batch });
                false
            }
            RequestState::Idle => {
                // Dropped from the queue as stale
                state.updates.restore(batch);
                false
            }
            RequestState::Completed => match request.take_result() {
                Some(geometry) if state.updates.is_empty() => {
                    debug!(
                        tile = %self.key,
                        elevation_lod = geometry.elevation_lod,
                        updates = geometry.updates.len(),
                        "Applying regenerated geometry"
                    );
                    *self.geometry.write() = Some(Arc::new(geometry));
                    metrics.geometry_applied();
                    true
                }
                _ => {
                    state.updates.restore(batch);
                    metrics.compile_deferred();
                    false
                }
            },
        }
    }

    /// Sends every pending update to the tilegen service as one compile,
    /// unless a compile is already in flight.
    fn dispatch_regeneration(&self, ctx: &dyn TerrainContext, state: &mut TileState, stamp: i64) {
        if state.regeneration.is_some() || state.updates.is_empty() {
            return;
        }
        let batch = state.updates.take_batch();
        let request = Arc::new(requests::regenerate(
            self.key,
            Arc::clone(&self.layers),
            ctx.technique(),
            batch.clone(),
        ));
        self.submit(
            ctx,
            ctx.tilegen_service().as_ref(),
            &request,
            self.key.lod as f32,
            stamp,
        );
        ctx.metrics().compile_dispatched();
        trace!(tile = %self.key, updates = batch.len(), "Regeneration dispatched");
        state.regeneration = Some(Regeneration { request, batch });
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("key", &self.key)
            .field("elevation_lod", &self.layers.elevation_lod())
            .field("traversed", &self.is_traversed())
            .finish()
    }
}
