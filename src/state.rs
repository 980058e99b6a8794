//! Shared application state
//!
//! Este módulo cablea todos los servicios a partir de un conjunto de
//! almacenes, un bus de mensajes y la configuración del motor. Es lo que
//! la capa HTTP externa recibe como estado de Axum.

use std::sync::Arc;

use crate::broker::{BrokerConfig, EventBus, MessagePublisher};
use crate::config::TrackingSettings;
use crate::repositories::Stores;
use crate::services::{
    CustomsBridge, DispatchSync, EventLog, ExceptionService, LocationService, TripService,
    ViewService,
};

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub bus: EventBus,
    pub events: EventLog,
    pub trips: TripService,
    pub locations: LocationService,
    pub exceptions: ExceptionService,
    pub views: ViewService,
    pub dispatch: DispatchSync,
    pub customs: CustomsBridge,
}

impl AppState {
    pub fn new(
        stores: Stores,
        publisher: Arc<dyn MessagePublisher>,
        broker: &BrokerConfig,
        settings: TrackingSettings,
    ) -> Self {
        let bus = EventBus::new(publisher, broker.topic_prefix.clone());
        let events = EventLog::new(stores.events.clone(), bus.clone());
        let trips = TripService::new(stores.trips.clone(), events.clone(), bus.clone());
        let locations = LocationService::new(stores.trips.clone(), events.clone(), settings);
        let exceptions =
            ExceptionService::new(stores.trips.clone(), stores.exceptions.clone(), bus.clone());
        let views = ViewService::new(stores.trips.clone(), stores.exceptions.clone());
        let dispatch = DispatchSync::new(trips.clone(), broker);
        let customs = CustomsBridge::new(trips.clone());

        Self {
            stores,
            bus,
            events,
            trips,
            locations,
            exceptions,
            views,
            dispatch,
            customs,
        }
    }
}
