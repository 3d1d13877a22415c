use std::env;
use std::sync::Arc;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use zarchive_lib::{magic, ArchivePaths, Coordinator, Error, Server};

fn main() -> Result<(), Error> {
    // Setup logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    let env_filter = EnvFilter::from_default_env();
    let max_level = match env_filter.max_level_hint() {
        Some(l) => l,
        None => LevelFilter::ERROR,
    };
    let show_debug = cfg!(debug_assertions) || max_level <= LevelFilter::DEBUG;
    tracing_subscriber::fmt::fmt()
        .with_target(false)
        .with_file(show_debug)
        .with_line_number(show_debug)
        .with_env_filter(env_filter)
        .init();

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "zarchive".to_string());
    let Some(file_root) = args.next() else {
        eprintln!("usage: {program} <file-root>");
        std::process::exit(2);
    };
    if args.next().is_some() {
        eprintln!("usage: {program} <file-root>");
        std::process::exit(2);
    }

    let rt = tokio::runtime::Runtime::new().map_err(|e| Error::from((e, file!(), line!())))?;
    rt.block_on(async {
        let paths = Arc::new(ArchivePaths::new(file_root)?);
        let index = zarchive_lib::open_or_bootstrap(paths)?;
        let coordinator = Coordinator::new(index);
        let server = Server::start(coordinator, magic::LISTEN_PORT).await?;
        tracing::info!("zarchive is serving on port {}", server.listen_port());

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::from((e, file!(), line!())))?;
        tracing::info!("interrupted; shutting down");
        server.stop_and_join().await;
        Ok(())
    })
}
