// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use std::path::PathBuf;

use actix_web::{App, HttpServer, web};
use clap::Parser;
use tracing::info;
use wgportal_core::lowlevel::{CurrentNetlink, CurrentWireGuard};
use wgportal_core::{ConfigRenderer, Manager, StoreBackend};
use wgportal_server::config::{self, DEFAULT_CONFIG_PATH};
use wgportal_server::portal::{HostPorts, Portal, PortalSettings};
use wgportal_server::routes;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(distribute)]
    {
        fmt().json().with_env_filter(filter).init();
    }

    #[cfg(not(distribute))]
    {
        fmt().pretty().with_env_filter(filter).init();
    }
}

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("GIT_VERSION"))]
#[command(about = "Manages WireGuard interfaces and peers")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen address, overrides the configuration file
    #[arg(short, long)]
    bind: Option<String>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut config = config::load(&args.config)
        .await
        .expect("failed to load configuration");
    config.apply_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    config.validate().expect("invalid configuration");
    info!(addr = %config.bind_addr, version = env!("GIT_VERSION"), "starting wgportal");

    let store = StoreBackend::open(config.database_url.as_deref())
        .await
        .expect("failed to open store");
    let manager = Manager::new(CurrentNetlink::default(), CurrentWireGuard::default(), store)
        .await
        .expect("failed to load state")
        .with_renderer(ConfigRenderer::new(env!("GIT_VERSION")));

    let portal: Portal<HostPorts> = Portal::new(manager, PortalSettings::from(&config));
    actix_web::rt::spawn(portal.clone().background_loop(config.background_interval()));
    info!(interval_secs = config.background_interval_secs, "background tasks scheduled");

    let bind = config.bind_addr.clone();
    let config_data = web::Data::new(config);
    let portal_data = web::Data::new(portal);

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(portal_data.clone())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(routes::configure::<HostPorts>)
    })
    .bind(&bind)?
    .run()
    .await
}
