use anyhow::Result;
use weatherdeck_core::{App, AppError};

fn main() -> Result<()> {
    weatherdeck_core::init()?;

    let mut app = match App::new() {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("Failed to start: {:#}", e);
            let err = AppError::from_anyhow(e);
            eprintln!("{}", err.user_message());
            return Err(err.into());
        }
    };

    tracing::info!("WeatherDeck started");

    println!("WeatherDeck - Favorite Cities");
    println!("\nConfiguration:");
    println!("  Config directory: {}", app.config().config_dir.display());
    println!("  Storage: {}", app.config().storage_path().display());

    let favorites = app.favorites().list();
    if favorites.is_empty() {
        println!("\nNo favorite cities yet.");
    } else {
        println!("\nFavorites ({}):", favorites.len());
        for city in &favorites {
            let region = match &city.state {
                Some(state) => format!("{}, {}", state, city.country),
                None => city.country.clone(),
            };
            println!("  {} ({}) [{}]", city.name, region, city.id);
        }
    }

    app.shutdown()?;

    Ok(())
}
