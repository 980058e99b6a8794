//! Máquina de estados del viaje
//!
//! Tabla de adyacencia pura: para cada estado, los estados a los que
//! puede pasar. Nada aquí toca la base de datos.

use crate::models::TripStatus;
use TripStatus::*;

/// Estados alcanzables desde `delayed` (vuelve a cualquier estado de avance)
const FROM_DELAYED: &[TripStatus] = &[
    EnRouteToPickup,
    AtPickup,
    Loading,
    DepartedPickup,
    InTransit,
    EnRouteToDelivery,
    AtDelivery,
    Unloading,
    Delivered,
    Completed,
];

/// Tabla de transiciones permitidas
pub const TRANSITIONS: &[(TripStatus, &[TripStatus])] = &[
    (Planned, &[Assigned, Cancelled]),
    (Assigned, &[EnRouteToPickup, Cancelled]),
    (EnRouteToPickup, &[AtPickup, Delayed]),
    (AtPickup, &[Loading, Delayed]),
    (Loading, &[DepartedPickup, Delayed]),
    (DepartedPickup, &[InTransit, EnRouteToDelivery]),
    (InTransit, &[EnRouteToDelivery, Delayed]),
    (EnRouteToDelivery, &[AtDelivery, Delayed]),
    (AtDelivery, &[Unloading, Delayed]),
    (Unloading, &[Delivered, Delayed]),
    (Delivered, &[Completed]),
    (Completed, &[Closed]),
    (Closed, &[]),
    (Cancelled, &[]),
    (Delayed, FROM_DELAYED),
    (CustomsHold, &[]),
];

/// Orden de avance; excluye `delayed`, `cancelled` y `customs_hold`
const FORWARD_SEQUENCE: &[TripStatus] = &[
    Planned,
    Assigned,
    EnRouteToPickup,
    AtPickup,
    Loading,
    DepartedPickup,
    InTransit,
    EnRouteToDelivery,
    AtDelivery,
    Unloading,
    Delivered,
    Completed,
    Closed,
];

/// Estados a los que se puede pasar desde `current`
pub fn allowed_transitions(current: TripStatus) -> &'static [TripStatus] {
    TRANSITIONS
        .iter()
        .find(|(from, _)| *from == current)
        .map(|(_, targets)| *targets)
        .unwrap_or(&[])
}

/// Reaplicar el mismo estado siempre es válido
pub fn can_transition(current: TripStatus, next: TripStatus) -> bool {
    current == next || allowed_transitions(current).contains(&next)
}

/// Posición en la secuencia de avance, si el estado pertenece a ella
pub fn progress_rank(status: TripStatus) -> Option<usize> {
    FORWARD_SEQUENCE.iter().position(|s| *s == status)
}

/// ¿El viaje ya pasó `milestone`? `None` si alguno de los dos no tiene rango.
pub fn has_progressed_past(current: TripStatus, milestone: TripStatus) -> Option<bool> {
    Some(progress_rank(current)? > progress_rank(milestone)?)
}

/// Marca de tiempo de hito que estampa cada estado destino
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    ActualStart,
    PickupArrival,
    PickupDeparture,
    DeliveryArrival,
    DeliveryDeparture,
    Completed,
    Closed,
}

/// Parada afectada por un hito
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAnchor {
    Pickup,
    Delivery,
}

/// Campo de la parada que se estampa
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStamp {
    ArrivedAt,
    DepartedAt,
}

impl Milestone {
    /// Columna de `trips` correspondiente
    pub fn column(&self) -> &'static str {
        match self {
            Milestone::ActualStart => "actual_start",
            Milestone::PickupArrival => "pickup_arrival",
            Milestone::PickupDeparture => "pickup_departure",
            Milestone::DeliveryArrival => "delivery_arrival",
            Milestone::DeliveryDeparture => "delivery_departure",
            Milestone::Completed => "completed_at",
            Milestone::Closed => "closed_at",
        }
    }

    pub fn stop_stamp(&self) -> Option<(StopAnchor, StopStamp)> {
        match self {
            Milestone::PickupArrival => Some((StopAnchor::Pickup, StopStamp::ArrivedAt)),
            Milestone::PickupDeparture => Some((StopAnchor::Pickup, StopStamp::DepartedAt)),
            Milestone::DeliveryArrival => Some((StopAnchor::Delivery, StopStamp::ArrivedAt)),
            Milestone::DeliveryDeparture => Some((StopAnchor::Delivery, StopStamp::DepartedAt)),
            _ => None,
        }
    }
}

/// Hito asociado a un estado destino
pub fn milestone_for(status: TripStatus) -> Option<Milestone> {
    match status {
        EnRouteToPickup => Some(Milestone::ActualStart),
        AtPickup => Some(Milestone::PickupArrival),
        DepartedPickup => Some(Milestone::PickupDeparture),
        AtDelivery => Some(Milestone::DeliveryArrival),
        Delivered => Some(Milestone::DeliveryDeparture),
        Completed => Some(Milestone::Completed),
        Closed => Some(Milestone::Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_status_has_a_table_row() {
        for status in TripStatus::ALL {
            assert!(
                TRANSITIONS.iter().any(|(from, _)| *from == status),
                "missing row for {}",
                status
            );
        }
    }

    #[test]
    fn test_same_status_is_always_allowed() {
        for status in TripStatus::ALL {
            assert!(can_transition(status, status));
        }
    }

    #[test]
    fn test_pairs_outside_table_are_rejected() {
        for from in TripStatus::ALL {
            for to in TripStatus::ALL {
                if from == to {
                    continue;
                }
                let listed = allowed_transitions(from).contains(&to);
                assert_eq!(can_transition(from, to), listed, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_specific_edges() {
        assert!(can_transition(Planned, Assigned));
        assert!(can_transition(Planned, Cancelled));
        assert!(!can_transition(Planned, InTransit));
        assert!(can_transition(DepartedPickup, EnRouteToDelivery));
        assert!(!can_transition(DepartedPickup, Delayed));
        assert!(can_transition(Delayed, Completed));
        assert!(!can_transition(Delayed, Closed));
        assert!(!can_transition(Delivered, Closed));
        assert!(!can_transition(Assigned, Delayed));
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        assert!(allowed_transitions(Closed).is_empty());
        assert!(allowed_transitions(Cancelled).is_empty());
    }

    #[test]
    fn test_customs_hold_is_unreachable() {
        for status in TripStatus::ALL {
            if status != CustomsHold {
                assert!(!can_transition(status, CustomsHold));
            }
        }
    }

    #[test]
    fn test_progress_ordering() {
        assert_eq!(progress_rank(Planned), Some(0));
        assert_eq!(progress_rank(Closed), Some(12));
        assert_eq!(progress_rank(Delayed), None);
        assert_eq!(progress_rank(Cancelled), None);
        assert_eq!(has_progressed_past(InTransit, AtPickup), Some(true));
        assert_eq!(has_progressed_past(AtPickup, AtPickup), Some(false));
        assert_eq!(has_progressed_past(Delayed, AtPickup), None);
    }

    #[test]
    fn test_milestones() {
        assert_eq!(milestone_for(EnRouteToPickup), Some(Milestone::ActualStart));
        assert_eq!(
            milestone_for(AtPickup).and_then(|m| m.stop_stamp()),
            Some((StopAnchor::Pickup, StopStamp::ArrivedAt))
        );
        assert_eq!(
            milestone_for(Delivered).and_then(|m| m.stop_stamp()),
            Some((StopAnchor::Delivery, StopStamp::DepartedAt))
        );
        assert_eq!(milestone_for(Loading), None);
        assert_eq!(Milestone::Completed.column(), "completed_at");
    }
}
