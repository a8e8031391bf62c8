use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::engine::barra_v1::{
    BarraV1, ConfigError, EngineConfig, Fill, Order, OrderError, OrderId, OrderOutcome,
    ScheduledOrder, SequencingError, Snapshot, Tick,
};
use crate::input::camilla::{Camilla, SnapshotColumns};

pub type InstanceId = u64;

pub struct InstanceState {
    pub id: InstanceId,
    pub engine: BarraV1,
}

/// Registry of engine instances. This is the handle layer: every instance is owned here, reached
/// only through its id, and removed on destroy so that later operations on the id fail rather
/// than silently no-op. There is no global instance; the server owns one `AppState` and passes it
/// through application data.
pub struct AppState {
    pub instances: HashMap<InstanceId, InstanceState>,
    pub last: InstanceId,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            instances: HashMap::new(),
            last: 0,
        }
    }

    fn instance(&self, id: InstanceId) -> Result<&InstanceState, BarraError> {
        self.instances.get(&id).ok_or(BarraError::UnknownInstance)
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut InstanceState, BarraError> {
        self.instances
            .get_mut(&id)
            .ok_or(BarraError::UnknownInstance)
    }

    pub fn create(&mut self, config: EngineConfig) -> Result<InstanceId, BarraError> {
        let engine = BarraV1::new(config).map_err(BarraError::InvalidConfig)?;
        let new_id = self.last + 1;
        self.instances.insert(new_id, InstanceState { id: new_id, engine });
        self.last = new_id;
        Ok(new_id)
    }

    pub fn destroy(&mut self, id: InstanceId) -> Result<(), BarraError> {
        self.instances
            .remove(&id)
            .map(|_| ())
            .ok_or(BarraError::UnknownInstance)
    }

    pub fn step_tick(&mut self, id: InstanceId, tick: &Tick) -> Result<Snapshot, BarraError> {
        self.instance_mut(id)?
            .engine
            .step_tick(tick)
            .map_err(BarraError::Sequencing)
    }

    pub fn step_batch(
        &mut self,
        id: InstanceId,
        ticks: &Camilla,
        scheduled: &[ScheduledOrder],
    ) -> Result<(Vec<Snapshot>, Vec<(usize, OrderError)>), BarraError> {
        let output = self
            .instance_mut(id)?
            .engine
            .step_batch(ticks, scheduled)
            .map_err(BarraError::Sequencing)?;
        Ok((output.snapshots, output.rejected))
    }

    pub fn place_order(
        &mut self,
        id: InstanceId,
        order: Order,
    ) -> Result<OrderOutcome, BarraError> {
        self.instance_mut(id)?
            .engine
            .place_order(order)
            .map_err(BarraError::Order)
    }

    pub fn cancel_order(&mut self, id: InstanceId, order_id: OrderId) -> Result<(), BarraError> {
        self.instance_mut(id)?
            .engine
            .cancel_order(order_id)
            .map_err(BarraError::Order)
    }

    pub fn snapshot(&self, id: InstanceId) -> Result<Snapshot, BarraError> {
        Ok(self.instance(id)?.engine.snapshot())
    }

    pub fn history(&self, id: InstanceId) -> Result<SnapshotColumns, BarraError> {
        Ok(self.instance(id)?.engine.history().into())
    }

    pub fn fills(&self, id: InstanceId, from: usize) -> Result<Vec<Fill>, BarraError> {
        Ok(self.instance(id)?.engine.fetch_fills(from))
    }
}

#[derive(Debug)]
pub enum BarraError {
    UnknownInstance,
    InvalidConfig(ConfigError),
    Order(OrderError),
    Sequencing(SequencingError),
}

impl std::error::Error for BarraError {}

impl core::fmt::Display for BarraError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BarraError::UnknownInstance => write!(f, "UnknownInstance"),
            BarraError::InvalidConfig(err) => write!(f, "InvalidConfig: {}", err),
            BarraError::Order(err) => write!(f, "Order: {}", err),
            BarraError::Sequencing(err) => write!(f, "Sequencing: {}", err),
        }
    }
}

impl actix_web::ResponseError for BarraError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            BarraError::UnknownInstance => actix_web::http::StatusCode::BAD_REQUEST,
            BarraError::InvalidConfig(_) => actix_web::http::StatusCode::BAD_REQUEST,
            BarraError::Order(_) => actix_web::http::StatusCode::BAD_REQUEST,
            BarraError::Sequencing(_) => actix_web::http::StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateRequest {
    pub config: EngineConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateResponse {
    pub instance_id: InstanceId,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TickRequest {
    pub tick: Tick,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TickResponse {
    pub snapshot: Snapshot,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BatchRequest {
    pub ticks: Camilla,
    pub scheduled: Vec<ScheduledOrder>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BatchResponse {
    pub snapshots: SnapshotColumns,
    pub rejected: Vec<(usize, OrderError)>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PlaceOrderRequest {
    pub order: Order,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PlaceOrderResponse {
    pub outcome: OrderOutcome,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CancelOrderRequest {
    pub order_id: OrderId,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SnapshotResponse {
    pub snapshot: Snapshot,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HistoryResponse {
    pub history: SnapshotColumns,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FillsRequest {
    pub from: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FillsResponse {
    pub fills: Vec<Fill>,
}

type BarraState = Mutex<AppState>;

pub mod server {
    use actix_web::{get, post, web};

    use super::{
        BarraError, BarraState, BatchRequest, BatchResponse, CancelOrderRequest, CreateRequest,
        CreateResponse, FillsRequest, FillsResponse, HistoryResponse, InstanceId,
        PlaceOrderRequest, PlaceOrderResponse, SnapshotResponse, TickRequest, TickResponse,
    };

    #[post("/create")]
    pub async fn create(
        app: web::Data<BarraState>,
        create: web::Json<CreateRequest>,
    ) -> Result<web::Json<CreateResponse>, BarraError> {
        let mut barra = app.lock().unwrap();
        let instance_id = barra.create(create.config)?;
        Ok(web::Json(CreateResponse { instance_id }))
    }

    #[post("/instance/{instance_id}/destroy")]
    pub async fn destroy(
        app: web::Data<BarraState>,
        path: web::Path<(InstanceId,)>,
    ) -> Result<web::Json<()>, BarraError> {
        let mut barra = app.lock().unwrap();
        let (instance_id,) = path.into_inner();
        barra.destroy(instance_id)?;
        Ok(web::Json(()))
    }

    #[post("/instance/{instance_id}/tick")]
    pub async fn tick(
        app: web::Data<BarraState>,
        path: web::Path<(InstanceId,)>,
        tick: web::Json<TickRequest>,
    ) -> Result<web::Json<TickResponse>, BarraError> {
        let mut barra = app.lock().unwrap();
        let (instance_id,) = path.into_inner();
        let snap = barra.step_tick(instance_id, &tick.tick)?;
        Ok(web::Json(TickResponse { snapshot: snap }))
    }

    #[post("/instance/{instance_id}/step_batch")]
    pub async fn step_batch(
        app: web::Data<BarraState>,
        path: web::Path<(InstanceId,)>,
        batch: web::Json<BatchRequest>,
    ) -> Result<web::Json<BatchResponse>, BarraError> {
        let mut barra = app.lock().unwrap();
        let (instance_id,) = path.into_inner();
        let (snapshots, rejected) = barra.step_batch(instance_id, &batch.ticks, &batch.scheduled)?;
        Ok(web::Json(BatchResponse {
            snapshots: snapshots.as_slice().into(),
            rejected,
        }))
    }

    #[post("/instance/{instance_id}/place_order")]
    pub async fn place_order(
        app: web::Data<BarraState>,
        path: web::Path<(InstanceId,)>,
        place_order: web::Json<PlaceOrderRequest>,
    ) -> Result<web::Json<PlaceOrderResponse>, BarraError> {
        let mut barra = app.lock().unwrap();
        let (instance_id,) = path.into_inner();
        let outcome = barra.place_order(instance_id, place_order.order.clone())?;
        Ok(web::Json(PlaceOrderResponse { outcome }))
    }

    #[post("/instance/{instance_id}/cancel_order")]
    pub async fn cancel_order(
        app: web::Data<BarraState>,
        path: web::Path<(InstanceId,)>,
        cancel_order: web::Json<CancelOrderRequest>,
    ) -> Result<web::Json<()>, BarraError> {
        let mut barra = app.lock().unwrap();
        let (instance_id,) = path.into_inner();
        barra.cancel_order(instance_id, cancel_order.order_id)?;
        Ok(web::Json(()))
    }

    #[get("/instance/{instance_id}/snapshot")]
    pub async fn snapshot(
        app: web::Data<BarraState>,
        path: web::Path<(InstanceId,)>,
    ) -> Result<web::Json<SnapshotResponse>, BarraError> {
        let barra = app.lock().unwrap();
        let (instance_id,) = path.into_inner();
        let snapshot = barra.snapshot(instance_id)?;
        Ok(web::Json(SnapshotResponse { snapshot }))
    }

    #[get("/instance/{instance_id}/history")]
    pub async fn history(
        app: web::Data<BarraState>,
        path: web::Path<(InstanceId,)>,
    ) -> Result<web::Json<HistoryResponse>, BarraError> {
        let barra = app.lock().unwrap();
        let (instance_id,) = path.into_inner();
        let history = barra.history(instance_id)?;
        Ok(web::Json(HistoryResponse { history }))
    }

    #[post("/instance/{instance_id}/fills")]
    pub async fn fills(
        app: web::Data<BarraState>,
        path: web::Path<(InstanceId,)>,
        fills: web::Json<FillsRequest>,
    ) -> Result<web::Json<FillsResponse>, BarraError> {
        let barra = app.lock().unwrap();
        let (instance_id,) = path.into_inner();
        let fills = barra.fills(instance_id, fills.from)?;
        Ok(web::Json(FillsResponse { fills }))
    }
}

/// Rust client for the JSON server, as much documentation of how hosts should call the server as
/// a client in its own right.
pub struct BarraClient {
    pub path: String,
    pub client: reqwest::Client,
}

impl BarraClient {
    pub fn new(path: String) -> Self {
        Self {
            path,
            client: reqwest::Client::new(),
        }
    }

    pub async fn create(&self, config: EngineConfig) -> Result<CreateResponse> {
        let req = CreateRequest { config };
        Ok(self
            .client
            .post(self.path.clone() + "/create")
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<CreateResponse>()
            .await?)
    }

    pub async fn destroy(&self, instance_id: InstanceId) -> Result<()> {
        self.client
            .post(format!("{}/instance/{}/destroy", self.path, instance_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn tick(&self, instance_id: InstanceId, tick: Tick) -> Result<TickResponse> {
        let req = TickRequest { tick };
        Ok(self
            .client
            .post(format!("{}/instance/{}/tick", self.path, instance_id))
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<TickResponse>()
            .await?)
    }

    pub async fn step_batch(
        &self,
        instance_id: InstanceId,
        ticks: Camilla,
        scheduled: Vec<ScheduledOrder>,
    ) -> Result<BatchResponse> {
        let req = BatchRequest { ticks, scheduled };
        Ok(self
            .client
            .post(format!("{}/instance/{}/step_batch", self.path, instance_id))
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<BatchResponse>()
            .await?)
    }

    pub async fn place_order(
        &self,
        instance_id: InstanceId,
        order: Order,
    ) -> Result<PlaceOrderResponse> {
        let req = PlaceOrderRequest { order };
        Ok(self
            .client
            .post(format!("{}/instance/{}/place_order", self.path, instance_id))
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<PlaceOrderResponse>()
            .await?)
    }

    pub async fn cancel_order(&self, instance_id: InstanceId, order_id: OrderId) -> Result<()> {
        let req = CancelOrderRequest { order_id };
        self.client
            .post(format!("{}/instance/{}/cancel_order", self.path, instance_id))
            .json(&req)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn snapshot(&self, instance_id: InstanceId) -> Result<SnapshotResponse> {
        Ok(self
            .client
            .get(format!("{}/instance/{}/snapshot", self.path, instance_id))
            .send()
            .await?
            .error_for_status()?
            .json::<SnapshotResponse>()
            .await?)
    }

    pub async fn history(&self, instance_id: InstanceId) -> Result<HistoryResponse> {
        Ok(self
            .client
            .get(format!("{}/instance/{}/history", self.path, instance_id))
            .send()
            .await?
            .error_for_status()?
            .json::<HistoryResponse>()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{test, web, App};
    use std::sync::Mutex;

    use crate::engine::barra_v1::{EngineConfig, Order, Side, Tick};

    use crate::input::camilla::Camilla;

    use super::server::*;
    use super::{
        AppState, BatchRequest, CreateRequest, CreateResponse, FillsRequest, FillsResponse,
        PlaceOrderRequest, PlaceOrderResponse, SnapshotResponse, TickRequest, TickResponse,
    };

    fn config() -> EngineConfig {
        EngineConfig {
            initial_cash: 100_000.0,
            maker_fee_rate: 0.0001,
            taker_fee_rate: 0.0002,
            spread_bps: 10.0,
            tick_size: 1.0,
        }
    }

    #[actix_web::test]
    async fn test_instance_lifecycle_loop() {
        let app_state = Mutex::new(AppState::new());
        let barra_state = web::Data::new(app_state);

        let app = test::init_service(
            App::new()
                .app_data(barra_state)
                .service(create)
                .service(destroy)
                .service(tick)
                .service(place_order)
                .service(snapshot)
                .service(fills),
        )
        .await;

        let req = test::TestRequest::post()
            .set_json(CreateRequest { config: config() })
            .uri("/create")
            .to_request();
        let resp: CreateResponse = test::call_and_read_body_json(&app, req).await;
        let instance_id = resp.instance_id;

        let req1 = test::TestRequest::post()
            .set_json(TickRequest {
                tick: Tick {
                    ts_ms: 100,
                    price_ticks: 100,
                    qty: 1.0,
                    side: Side::Buy,
                },
            })
            .uri(format!("/instance/{instance_id}/tick").as_str())
            .to_request();
        let resp1: TickResponse = test::call_and_read_body_json(&app, req1).await;
        assert_eq!(resp1.snapshot.mark_price, 100.0);

        let req2 = test::TestRequest::post()
            .set_json(PlaceOrderRequest {
                order: Order::market_buy(1.0),
            })
            .uri(format!("/instance/{instance_id}/place_order").as_str())
            .to_request();
        let _resp2: PlaceOrderResponse = test::call_and_read_body_json(&app, req2).await;

        let req3 = test::TestRequest::get()
            .uri(format!("/instance/{instance_id}/snapshot").as_str())
            .to_request();
        let resp3: SnapshotResponse = test::call_and_read_body_json(&app, req3).await;
        assert_eq!(resp3.snapshot.ts_ms, 100);

        let fills_req = test::TestRequest::post()
            .set_json(FillsRequest { from: 0 })
            .uri(format!("/instance/{instance_id}/fills").as_str())
            .to_request();
        let fills_resp: FillsResponse = test::call_and_read_body_json(&app, fills_req).await;
        assert_eq!(fills_resp.fills.len(), 1);
        assert_eq!(fills_resp.fills[0].qty, 1.0);

        // from past the end of the trade log returns nothing new
        let fills_req = test::TestRequest::post()
            .set_json(FillsRequest { from: 1 })
            .uri(format!("/instance/{instance_id}/fills").as_str())
            .to_request();
        let fills_resp: FillsResponse = test::call_and_read_body_json(&app, fills_req).await;
        assert!(fills_resp.fills.is_empty());

        let req4 = test::TestRequest::post()
            .uri(format!("/instance/{instance_id}/destroy").as_str())
            .to_request();
        let resp4 = test::call_service(&app, req4).await;
        assert!(resp4.status().is_success());

        // Any operation after destroy must fail fast, never silently no-op
        let req5 = test::TestRequest::get()
            .uri(format!("/instance/{instance_id}/snapshot").as_str())
            .to_request();
        let resp5 = test::call_service(&app, req5).await;
        assert!(resp5.status().is_client_error());
    }

    #[::core::prelude::v1::test]
    fn test_that_batch_request_wire_format_is_columnar() {
        let ticks = Camilla::from_columns(vec![100], vec![4_200], vec![1.0], vec![0]).unwrap();
        let req = BatchRequest {
            ticks,
            scheduled: Vec::new(),
        };

        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["ticks"]["ts_ms"], serde_json::json!([100]));
        assert_eq!(wire["ticks"]["price_ticks"], serde_json::json!([4_200]));
        assert_eq!(wire["ticks"]["side"], serde_json::json!([0]));
    }

    #[actix_web::test]
    async fn test_that_invalid_config_creates_no_instance() {
        let app_state = Mutex::new(AppState::new());
        let barra_state = web::Data::new(app_state);

        let app = test::init_service(App::new().app_data(barra_state).service(create)).await;

        let mut bad = config();
        bad.tick_size = 0.0;
        let req = test::TestRequest::post()
            .set_json(CreateRequest { config: bad })
            .uri("/create")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
    }

    #[actix_web::test]
    async fn test_that_instances_are_independent() {
        let app_state = Mutex::new(AppState::new());
        let barra_state = web::Data::new(app_state);

        let app = test::init_service(
            App::new()
                .app_data(barra_state)
                .service(create)
                .service(tick)
                .service(snapshot),
        )
        .await;

        let req = test::TestRequest::post()
            .set_json(CreateRequest { config: config() })
            .uri("/create")
            .to_request();
        let first: CreateResponse = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .set_json(CreateRequest { config: config() })
            .uri("/create")
            .to_request();
        let second: CreateResponse = test::call_and_read_body_json(&app, req).await;
        assert_ne!(first.instance_id, second.instance_id);

        let req = test::TestRequest::post()
            .set_json(TickRequest {
                tick: Tick {
                    ts_ms: 100,
                    price_ticks: 100,
                    qty: 1.0,
                    side: Side::Buy,
                },
            })
            .uri(format!("/instance/{}/tick", first.instance_id).as_str())
            .to_request();
        let _: TickResponse = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::get()
            .uri(format!("/instance/{}/snapshot", second.instance_id).as_str())
            .to_request();
        let resp: SnapshotResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.snapshot.mark_price, 0.0);
    }
}
