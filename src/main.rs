use std::error::Error;

use clap::{CommandFactory, Parser};
use tracing::{error, info, warn};

use volley::args::CliArgs;
use volley::engine::Executor;
use volley::logger;
use volley::shutdown::Shutdown;

fn main() -> Result<(), Box<dyn Error>> {
    if std::env::args_os().len() <= 1 {
        CliArgs::command().print_help()?;
        println!();
        return Ok(());
    }

    let args = CliArgs::parse();
    logger::init_logging(
        &args.log_level,
        args.log_file.as_deref(),
        args.quiet,
        args.verbose,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let config = match args.build_config() {
            Ok(config) => config,
            Err(err) => {
                error!("invalid configuration: {}", err);
                return Err(std::io::Error::other(err.to_string()).into());
            }
        };

        let executor = match Executor::new(config) {
            Ok(executor) => executor,
            Err(err) => {
                error!("startup failed: {}", err);
                return Err(std::io::Error::other(err.to_string()).into());
            }
        };

        let shutdown = Shutdown::new();
        let signal_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping");
                signal_shutdown.trigger();
            }
        });

        let report = match executor.run(&shutdown).await {
            Ok(report) => report,
            Err(err) => {
                executor.stop_realtime();
                error!("run failed: {}", err);
                return Err(std::io::Error::other(err.to_string()).into());
            }
        };

        report.print_summary();

        if !args.no_report {
            match report.save_artifacts(&args.report_prefix) {
                Ok(dir) => info!("report written to {}", dir.display()),
                Err(err) => warn!("failed to write report artifacts: {}", err),
            }
        }

        executor.stop_realtime();
        Ok(())
    })
}
