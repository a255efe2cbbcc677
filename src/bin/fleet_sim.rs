use clap::Parser;
use fleet_sim::external_services::RouteProvider;
use fleet_sim::external_services::gazetteer::GazetteerProvider;
use fleet_sim::simulation::config::{CommandLineArgs, Config, Provider};
use fleet_sim::simulation::controller::{FleetController, FleetControllerBuilder};
use fleet_sim::simulation::fleet::DispatchError;
use fleet_sim::simulation::logging::init_logging;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::{fs, io, process};
use tracing::info;

fn main() {
    let args = CommandLineArgs::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            eprintln!("{e}");
            process::exit(1)
        }),
        None => Config::default(),
    };
    fs::create_dir_all(&config.output.output_dir).expect("failed to create output directory");
    let _guards = init_logging(&config.output.output_dir, config.output.log_file);
    info!("started with args: {args:?}");

    let provider = build_provider(&config);
    let controller = FleetControllerBuilder::default()
        .config(Arc::new(config))
        .provider(provider)
        .build()
        .expect("failed to build fleet controller");

    println!("*** Fleet simulator. Vehicles report to the output directory. ***");
    run_menu(&controller);

    println!("Vehicles shutting down...");
    controller.shutdown();
}

fn build_provider(config: &Config) -> Arc<dyn RouteProvider> {
    match &config.provider {
        Provider::Gazetteer {
            file,
            waypoint_spacing,
        } => {
            let provider =
                GazetteerProvider::from_file(file, *waypoint_spacing).unwrap_or_else(|e| {
                    eprintln!("{e}");
                    process::exit(1)
                });
            Arc::new(provider)
        }
        Provider::Mapbox { token_env, bbox } => {
            #[cfg(feature = "http")]
            {
                let provider =
                    fleet_sim::external_services::mapbox::MapboxProvider::from_env(
                        token_env,
                        bbox.clone(),
                    )
                    .unwrap_or_else(|e| {
                        eprintln!("{e}");
                        process::exit(1)
                    });
                Arc::new(provider)
            }
            #[cfg(not(feature = "http"))]
            {
                let _ = (token_env, bbox);
                eprintln!(
                    "HTTP support is not enabled. Please recompile with the `http` feature enabled."
                );
                process::exit(1)
            }
        }
    }
}

fn run_menu(controller: &FleetController) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print_menu();
        let Some(Ok(line)) = lines.next() else {
            break;
        };
        let choice: i32 = match line.trim().parse() {
            Ok(choice) => choice,
            Err(_) => {
                println!("Choice must be a number between 1 and 3!");
                continue;
            }
        };
        match choice {
            1 => match controller.add_vehicle_with_defaults() {
                Ok(id) => println!("Adding vehicle #{id}"),
                Err(e) => println!("Could not add a vehicle: {e}"),
            },
            2 => {
                println!("Please enter the address where you need a vehicle sent.");
                let Some(Ok(address)) = lines.next() else {
                    break;
                };
                let address = address.trim();
                if !valid_address(address) {
                    println!(
                        "Addresses must be longer than 3 characters and contain no semicolon."
                    );
                    continue;
                }
                match controller.request_dispatch(address) {
                    Ok(id) => println!("Directing vehicle #{id} to {address}."),
                    Err(DispatchError::AddressNotFound(_)) => println!(
                        "Your address could not be found, possibly because it was misspelled. Please try again."
                    ),
                    Err(e) => println!("Dispatch failed: {e}"),
                }
            }
            3 => break,
            _ => println!("Choice must be between 1 and 3!"),
        }
    }
}

fn print_menu() {
    println!("\nPlease pick an option from 1 to 3:");
    println!("1) Add a vehicle");
    println!("2) Direct a vehicle to an address");
    println!("3) Exit");
    let _ = io::stdout().flush();
}

fn valid_address(address: &str) -> bool {
    address.len() > 3 && !address.contains(';')
}
