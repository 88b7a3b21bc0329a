use shopdesk_db::repositories::{SqlCustomerRepository, SqlProductRepository};
use shopdesk_db::{DemoCatalog, SeedResult};

use crate::commands::{connect_and_migrate, prepare, CommandResult, Failure};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let products = SqlProductRepository::new(pool.clone());
        let customers = SqlCustomerRepository::new(pool.clone());

        let seeded = DemoCatalog::load(&products, &customers)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoCatalog::verify(&products, &customers)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let outcome: Result<SeedResult, Failure> = if verification.all_present {
            Ok(seeded)
        } else {
            let missing: Vec<&str> = verification
                .checks
                .iter()
                .filter_map(|(check, present)| (!present).then_some(*check))
                .collect();
            Err(("seed_verification", verification_message(&missing), 6u8))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_message(&seeded)),
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}

fn seed_message(seeded: &SeedResult) -> String {
    format!(
        "demo catalogue verified: {} product(s) and {} customer(s) created, {} product(s) and {} customer(s) already present",
        seeded.products_created,
        seeded.customers_created,
        seeded.products_existing,
        seeded.customers_existing
    )
}

fn verification_message(missing: &[&str]) -> String {
    if missing.is_empty() {
        "some demo rows failed to load".to_string()
    } else {
        format!("seed verification failed for: {}", missing.join(", "))
    }
}
