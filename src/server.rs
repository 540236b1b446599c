use crate::config::AppConfig;
use crate::export::feature_collection;
use crate::processing::PoiCatchments;
use crate::types::Catchment;
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use geo::algorithm::contains::Contains;
use geo::bounding_rect::BoundingRect;
use geo::Point;
use geojson::FeatureCollection;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

// Bounding box of one catchment, pointing back into AppState::catchments
pub struct CatchmentIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for CatchmentIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub results: Vec<PoiCatchments>,
    pub catchments: Vec<Catchment>,
    pub tree: RTree<CatchmentIndex>,
}

impl AppState {
    pub fn new(config: AppConfig, results: Vec<PoiCatchments>) -> Self {
        let catchments: Vec<Catchment> = results.iter()
            .flat_map(|r| r.catchments(&config))
            .collect();

        let tree_items: Vec<CatchmentIndex> = catchments.iter().enumerate()
            .filter_map(|(i, c)| {
                let rect = c.polygon.geometry.bounding_rect()?;
                Some(CatchmentIndex {
                    index: i,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        Self { config, results, catchments, tree: RTree::bulk_load(tree_items) }
    }

    /// Catchments whose polygon contains the point, in index order.
    pub fn query(&self, lat: f64, lon: f64) -> Vec<CatchmentSummary> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);

        let mut hits: Vec<usize> = self.tree.locate_in_envelope_intersecting(&envelope)
            .map(|candidate| candidate.index)
            .filter(|&i| self.catchments[i].polygon.geometry.contains(&point))
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| CatchmentSummary::from(&self.catchments[i])).collect()
    }

    pub fn poi_collection(&self, poi: &str) -> Option<FeatureCollection> {
        let result = self.results.iter().find(|r| r.poi.name == poi)?;
        Some(feature_collection(&self.config, std::iter::once(result)))
    }
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Serialize)]
pub struct CatchmentSummary {
    pub poi: String,
    pub mode: String,
    pub color: String,
    pub area_km2: f64,
    pub max_distance_km: f64,
}

impl From<&Catchment> for CatchmentSummary {
    fn from(c: &Catchment) -> Self {
        Self {
            poi: c.poi.clone(),
            mode: c.mode.clone(),
            color: c.color.clone(),
            area_km2: c.polygon.area_km2,
            max_distance_km: c.polygon.max_distance_km,
        }
    }
}

pub async fn start_server(config: AppConfig, results: Vec<PoiCatchments>) -> Result<()> {
    info!("Building spatial index for API...");
    let maps_dir = config.output.dir.join("maps");
    let port = config.server.port;
    let state = Arc::new(AppState::new(config, results));
    info!("Indexed {} catchments", state.catchments.len());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let app = Router::new()
        .route("/api/catchments", get(list_handler))
        .route("/api/catchments/:poi", get(poi_handler))
        .route("/api/query", get(query_handler))
        .nest_service("/maps", ServeDir::new(maps_dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<CatchmentSummary>> {
    Json(state.catchments.iter().map(CatchmentSummary::from).collect())
}

async fn poi_handler(
    State(state): State<Arc<AppState>>,
    Path(poi): Path<String>,
) -> Result<Json<FeatureCollection>, StatusCode> {
    state.poi_collection(&poi).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Vec<CatchmentSummary>> {
    Json(state.query(params.lat, params.lon))
}
