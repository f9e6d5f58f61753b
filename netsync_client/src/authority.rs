//! Authority resolution.
//!
//! Decides each tick whether a tracked vehicle is driven by the network
//! stream or by the local player's own control loop.

use netsync_shared::ids::{LocalHandle, Seat};

use crate::engine::LocalPlayer;

/// Who drives an object this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Network snapshots drive the object.
    Remote,
    /// The local player is driving it; network writes are suppressed.
    Local,
}

/// How to handle a remote occupant (re-)entering a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPlan {
    /// Normal path: resolve or create the vehicle and seat the occupant.
    Proceed,
    /// Local player is already inside and claiming the driver seat: swap
    /// seats in place instead of re-creating anything.
    WarpLocalToDriver,
}

/// Remote unless the local player sits in the driver seat of `vehicle`.
pub fn resolve(vehicle: LocalHandle, player: &LocalPlayer) -> Authority {
    match player.seated {
        Some((v, Seat::Driver)) if v == vehicle => Authority::Local,
        _ => Authority::Remote,
    }
}

/// Plans a seat transition for a remote occupant of `vehicle`.
///
/// `remote_seat` is the seat the remote occupant reports; `remote_inside`
/// whether its character is already sitting in the vehicle locally.
pub fn plan_entry(
    vehicle: LocalHandle,
    remote_seat: Option<Seat>,
    remote_inside: bool,
    player: &LocalPlayer,
) -> EntryPlan {
    let player_inside = matches!(player.seated, Some((v, _)) if v == vehicle);
    let player_front_passenger = matches!(player.seated, Some((_, Seat::Passenger(0))));
    let claiming_driver = matches!(player.entering, Some((v, Seat::Driver)) if v == vehicle);

    if remote_inside
        && remote_seat == Some(Seat::Driver)
        && player_inside
        && player_front_passenger
        && claiming_driver
    {
        EntryPlan::WarpLocalToDriver
    } else {
        EntryPlan::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(raw: u32) -> LocalHandle {
        LocalHandle::new(raw).unwrap()
    }

    #[test]
    fn driver_seat_is_local_authority() {
        let car = h(3);
        let mut player = LocalPlayer {
            ped: Some(h(1)),
            seated: Some((car, Seat::Driver)),
            entering: None,
        };
        assert_eq!(resolve(car, &player), Authority::Local);
        assert_eq!(resolve(h(4), &player), Authority::Remote);

        player.seated = Some((car, Seat::Passenger(0)));
        assert_eq!(resolve(car, &player), Authority::Remote);

        // Exiting flips authority back without touching the vehicle.
        player.seated = None;
        assert_eq!(resolve(car, &player), Authority::Remote);
    }

    #[test]
    fn reentry_short_circuits_to_seat_warp() {
        let car = h(3);
        let player = LocalPlayer {
            ped: Some(h(1)),
            seated: Some((car, Seat::Passenger(0))),
            entering: Some((car, Seat::Driver)),
        };
        assert_eq!(
            plan_entry(car, Some(Seat::Driver), true, &player),
            EntryPlan::WarpLocalToDriver
        );
        assert_eq!(
            plan_entry(car, Some(Seat::Passenger(1)), true, &player),
            EntryPlan::Proceed
        );
        assert_eq!(
            plan_entry(car, Some(Seat::Driver), false, &player),
            EntryPlan::Proceed
        );
    }
}
