use stress_test::{stress_test_convergence, stress_test_scaling, Chaos};
use tracing_subscriber::EnvFilter;

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    let converged = rt.block_on(async_main());
    if !converged {
        eprintln!("\n✗ Some replicas did not converge");
        std::process::exit(1);
    }
    Ok(())
}

async fn async_main() -> bool {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICA CONVERGENCE STRESS TESTS                ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut converged = true;

    // Test 1: well-behaved channel, small board
    let stats = stress_test_convergence(4, 50, Chaos::none()).await;
    stats.print();
    converged &= stats.converged;

    // Test 2: duplicated events, dropped channels and lost events
    let stats = stress_test_convergence(4, 50, Chaos::heavy()).await;
    stats.print();
    converged &= stats.converged;

    // Test 3: more viewers under chaos
    let stats = stress_test_convergence(10, 100, Chaos::heavy()).await;
    stats.print();
    converged &= stats.converged;

    // Test 4: scaling analysis
    converged &= stress_test_scaling(12, 3).await;

    if converged {
        println!("\n✓ All stress tests completed successfully!");
    }
    converged
}
