use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parcel_core::repository::{LoggingEventSink, ShipmentEventSink};
use parcel_core::{PartnerOverrides, PartnerRef, RangeKind, RoutingResolver, SequenceAllocator, Shipment};
use parcel_shipment::{ShipmentAssemblyOrchestrator, ShipmentDraft};
use parcel_store::{
    telemetry, Config, DbClient, PgPartnerRepository, PgRangeRepository, PgSequenceAllocator,
    PgShipmentRepository,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "parcelctl")]
#[command(about = "Operator tool for the parcel routing and assembly store")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,

    /// Draw the next value from a counter (default: the configured one)
    Next { sequence: Option<String> },

    /// Show which partner covers an address
    Resolve {
        country: String,
        code: String,
        /// pickup or delivery
        kind: RangeKind,
    },

    /// Print a shipment and its packages
    Show { tracking_number: i64 },

    /// Assemble a shipment from a JSON draft file
    Create {
        draft: String,
        #[arg(long)]
        booking_partner: Option<Uuid>,
        /// Station number of a pickup partner that replaces the routed one
        #[arg(long)]
        pickup_station: Option<i32>,
        /// Station number of a delivery partner that replaces the routed one
        #[arg(long)]
        delivery_station: Option<i32>,
    },

    /// Cancel a shipment and all of its packages
    Cancel { tracking_number: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load().context("Failed to load config")?;
    telemetry::init_tracing(&config.logging.filter).context("Failed to install tracing")?;

    let db = DbClient::from_config(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let pool = db.pool.clone();

    let sequences = Arc::new(
        PgSequenceAllocator::new(pool.clone())
            .with_seed(config.sequence.seed)
            .with_lock_timeout(Duration::from_millis(config.database.lock_timeout_ms)),
    );
    let routing = RoutingResolver::new(
        Arc::new(PgRangeRepository::new(pool.clone())),
        Arc::new(PgPartnerRepository::new(pool.clone())),
    );
    let shipments = Arc::new(PgShipmentRepository::new(pool.clone()));

    match args.command {
        Command::Migrate => {
            db.migrate().await.context("Migration failed")?;
        }
        Command::Next { sequence } => {
            let name = sequence.unwrap_or_else(|| config.sequence.name.clone());
            let value = sequences.next(&name).await?;
            println!("{}", value);
        }
        Command::Resolve { country, code, kind } => {
            match routing.resolve_partner(&country, &code, kind).await? {
                Some(partner_id) => println!("{}", partner_id),
                None => println!("unassigned"),
            }
        }
        Command::Show { tracking_number } => {
            let orchestrator = ShipmentAssemblyOrchestrator::new(
                sequences,
                routing,
                shipments,
                Arc::new(LoggingEventSink),
                config.assembly_settings(),
            );
            print_shipment(&orchestrator.get_shipment(tracking_number).await?);
        }
        Command::Create {
            draft,
            booking_partner,
            pickup_station,
            delivery_station,
        } => {
            let raw = std::fs::read_to_string(&draft).with_context(|| format!("Cannot read {}", draft))?;
            let draft: ShipmentDraft = serde_json::from_str(&raw).with_context(|| format!("Invalid draft {}", draft))?;
            let overrides = PartnerOverrides {
                pickup: pickup_station.map(PartnerRef::Station),
                delivery: delivery_station.map(PartnerRef::Station),
            };

            let orchestrator = ShipmentAssemblyOrchestrator::new(
                sequences,
                routing,
                shipments,
                event_sink(&config)?,
                config.assembly_settings(),
            );
            let shipment = orchestrator.create_shipment(draft, booking_partner, &overrides).await?;
            print_shipment(&shipment);
        }
        Command::Cancel { tracking_number } => {
            let orchestrator = ShipmentAssemblyOrchestrator::new(
                sequences,
                routing,
                shipments,
                event_sink(&config)?,
                config.assembly_settings(),
            );
            let shipment = orchestrator.cancel_shipment(tracking_number).await?;
            print_shipment(&shipment);
        }
    }

    Ok(())
}

#[cfg(feature = "kafka")]
fn event_sink(config: &Config) -> anyhow::Result<Arc<dyn ShipmentEventSink>> {
    match &config.kafka {
        Some(kafka) => {
            let producer = parcel_store::EventProducer::new(&kafka.brokers).context("Failed to create Kafka producer")?;
            Ok(Arc::new(parcel_store::KafkaEventSink::new(producer, kafka.topic.clone())))
        }
        None => Ok(Arc::new(LoggingEventSink)),
    }
}

#[cfg(not(feature = "kafka"))]
fn event_sink(config: &Config) -> anyhow::Result<Arc<dyn ShipmentEventSink>> {
    if config.kafka.is_some() {
        tracing::warn!("kafka section ignored: built without the `kafka` feature");
    }
    Ok(Arc::new(LoggingEventSink))
}

fn print_shipment(shipment: &Shipment) {
    let partner = |id: Option<Uuid>| id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());

    println!("tracking number  {}", shipment.tracking_number);
    if let Some(cancelled_at) = shipment.cancelled_at {
        println!("cancelled        {}", cancelled_at);
    }
    println!("booking partner  {}", partner(shipment.booking_partner_id));
    println!("pickup partner   {}", partner(shipment.pickup_partner_id));
    println!("delivery partner {}", partner(shipment.delivery_partner_id));
    println!(
        "totals           {:.2} kg, {:.2} kg volumetric, girth {:.0} cm",
        shipment.weight_total, shipment.volume_weight_total, shipment.girth_max
    );
    for package in &shipment.packages {
        println!(
            "  {}  {:<11} {}x{}x{} cm  {:.2} kg{}",
            package.package_number,
            package.packaging_type.as_str(),
            package.length_cm,
            package.width_cm,
            package.height_cm,
            package.weight_kg,
            if package.is_cancelled() { "  (cancelled)" } else { "" }
        );
    }
}
