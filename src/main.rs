//! typedb-probe - connect to a TypeDB server or cluster and report its databases

use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use typedb_client::connection::WsConnector;
use typedb_client::{Client, ClientArgs, ClusterClient, TypeDBClient};

#[derive(Serialize)]
struct DatabaseReport {
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    replicas: Vec<ReplicaReport>,
}

#[derive(Serialize)]
struct ReplicaReport {
    address: String,
    primary: bool,
    preferred: bool,
    term: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = ClientArgs::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("typedb_client={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let addresses = args.addresses();
    let config = args.client_config();
    info!("Addresses: {:?}", addresses);
    info!("Streams: {}", config.parallelisation);

    let connector = Arc::new(WsConnector::new(config.request_timeout));
    let client: Box<dyn TypeDBClient> = if args.is_cluster() {
        Box::new(ClusterClient::open_with(&addresses, connector, config).await?)
    } else {
        Box::new(Client::open_with(&addresses[0], connector, config).await?)
    };

    let report = match client.as_cluster() {
        Ok(cluster) => cluster
            .databases()
            .all()
            .await
            .map(|databases| {
                databases
                    .into_iter()
                    .map(|database| DatabaseReport {
                        name: database.name,
                        replicas: database
                            .replicas
                            .into_iter()
                            .map(|r| ReplicaReport {
                                address: r.address,
                                primary: r.primary,
                                preferred: r.preferred,
                                term: r.term,
                            })
                            .collect(),
                    })
                    .collect::<Vec<_>>()
            }),
        Err(_) => client.database_names().await.map(|names| {
            names
                .into_iter()
                .map(|name| DatabaseReport { name, replicas: Vec::new() })
                .collect()
        }),
    };

    client.close().await;

    let report = report?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
