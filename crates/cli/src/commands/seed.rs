use trustline_db::{DemoDataset, OrderSeedInfo, SqlOrderRepository};

use crate::commands::{async_runtime, load_config, migrated_pool, CommandResult, StepError};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let orders = SqlOrderRepository::new(pool.clone());

        let run_result: Result<Vec<OrderSeedInfo>, StepError> = async {
            let seeded = DemoDataset::load(&orders)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            let verification = DemoDataset::verify(&orders)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
            if verification.all_present {
                Ok(seeded.orders_seeded)
            } else {
                let failed: Vec<&str> = verification
                    .checks
                    .iter()
                    .filter_map(|(check, passed)| (!passed).then_some(*check))
                    .collect();
                Err(("seed_verification", verification_message(&failed), 6u8))
            }
        }
        .await;

        pool.close().await;
        run_result
    });

    match result {
        Ok(orders) => {
            let lines: Vec<String> = orders
                .iter()
                .map(|order| format!("  - {}: {}", order.order_id, order.description))
                .collect();
            CommandResult::success(
                "seed",
                format!("demo orders loaded:\n{}", lines.join("\n")),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed: &[&str]) -> String {
    if failed.is_empty() {
        "some demo orders failed to load".to_string()
    } else {
        format!("seed verification failed for orders: {}", failed.join(", "))
    }
}
