//! Manual smoke test for pinpoint-location.
//!
//! Run with: cargo run -p pinpoint-location-test

use std::sync::{mpsc, Arc};
use std::time::Duration;

use pinpoint_location::{Coordinate, LocationFacade, LocationUpdateDelegate};

struct ChannelDelegate {
    sender: mpsc::Sender<Coordinate>,
}

impl LocationUpdateDelegate for ChannelDelegate {
    fn on_location_update(&self, _facade: &LocationFacade, coordinate: Coordinate) {
        let _ = self.sender.send(coordinate);
    }
}

fn main() {
    println!("=== pinpoint-location smoke test ===\n");

    let facade = LocationFacade::new();
    facade.set_on_authorization_error(|status| {
        println!("✗ Authorization failed: {status:?}");
    });
    facade.set_on_error(|error| {
        println!("✗ Location error: {error}");
    });

    let (sender, receiver) = mpsc::channel();
    let delegate: Arc<dyn LocationUpdateDelegate> = Arc::new(ChannelDelegate { sender });
    facade.set_update_delegate(&delegate);

    println!("Requesting location update...");
    facade.request_location_update();

    match receiver.recv_timeout(Duration::from_secs(30)) {
        Ok(coordinate) => {
            println!("✓ Fix received!");
            println!("  Latitude:  {:.6}°", coordinate.latitude);
            println!("  Longitude: {:.6}°", coordinate.longitude);
            if let Some(altitude) = coordinate.altitude {
                println!("  Altitude:  {altitude:.1}m");
            }
            if let Some(accuracy) = coordinate.horizontal_accuracy {
                println!("  Accuracy:  {accuracy:.1}m");
            }
            println!("  Timestamp: {}", coordinate.timestamp);
        }
        Err(_) => println!("✗ No fix within 30 seconds"),
    }
}
