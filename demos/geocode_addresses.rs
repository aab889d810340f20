use anyhow::Result;
use portall::{
    Client, GeocodingHelper, GeocodingOptions, Isovist, IsovistHelper, MetadataCache,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure authentication via the PYPORTALL_API_KEY environment variable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = Client::from_env()?
        .with_progress(true)
        .with_max_wait(Duration::from_secs(600));

    let options = GeocodingOptions {
        city: Some("Madrid".to_string()),
        ..GeocodingOptions::default()
    };
    let positions = GeocodingHelper::new(&client)
        .with_options(options)
        .from_addresses(&["Gran Vía 46", "Calle Alcalá 10"])?;

    let mut isovists: Vec<Isovist> = positions
        .into_iter()
        .map(|p| Isovist::new(p).with_radius(100))
        .collect();
    IsovistHelper::new(&client).resolve(&mut isovists)?;

    for isovist in &isovists {
        println!(
            "{:?}: {}",
            isovist.destination.lon_lat(),
            isovist
                .geom
                .as_ref()
                .map(|g| serde_json::to_string(g).unwrap_or_default())
                .unwrap_or_default()
        );
    }

    let metadata = MetadataCache::new(client)?;
    if let Some(pop) = metadata.get("pop") {
        println!("{}: {} ({} credit(s))", pop.code, pop.description, pop.credits);
    }
    Ok(())
}
