//! Exemple : découvre la caméra, affiche ses informations et prend une photo.
//!
//! Usage:
//! ```bash
//! cargo run --example take_picture -- wlan0
//! ```

use pmosonycam::{Camera, RpcErrorKind};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let interface = std::env::args().nth(1);
    let camera = Camera::new(interface.as_deref())?;

    let info = camera.info();
    println!("📷 {} (API {})", info.name, info.api_version);
    println!("Services : {}", info.supported_services.join(", "));
    println!("{} méthodes disponibles", info.available_apis.len());

    if !camera.has_api("actTakePicture") {
        println!("Cette caméra ne sait pas prendre de photo dans son mode actuel");
        return Ok(());
    }

    match camera.call("actTakePicture") {
        Ok(urls) => println!("✓ Photo prise : {}", urls),
        Err(e) if e.rpc_kind() == Some(RpcErrorKind::LongShooting) => {
            // La prise de vue est encore en cours, la caméra publiera l'URL plus tard
            let urls = camera.call("awaitTakePicture")?;
            println!("✓ Photo prise : {}", urls);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
