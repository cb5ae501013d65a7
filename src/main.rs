use std::{process, str::FromStr, sync::Arc};

use examdash::{
    application::{Dashboard, TracingNotifier, error::AppError},
    cache::{CacheConfig, CacheError, Collection, Record},
    config::{self, ListArgs},
    domain::resources::Resource,
    infra::{api_client::ApiClient, telemetry},
};
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.render(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report.render(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Resources => run_resources(&settings),
        config::Command::List(args) => run_list(settings, args).await,
    }
}

fn run_resources(settings: &config::Settings) -> Result<(), AppError> {
    let rows: Vec<_> = Resource::ALL
        .into_iter()
        .map(|resource| {
            let stale_after = resource
                .stale_after()
                .unwrap_or(settings.cache.default_stale_after);
            json!({
                "resource": resource.as_str(),
                "path": resource.path(),
                "stale_after_seconds": stale_after.as_secs(),
                "evict_after_seconds": settings.cache.default_evict_after.as_secs(),
                "search_fields": resource.search_fields(),
            })
        })
        .collect();
    print_json(&rows)
}

async fn run_list(settings: config::Settings, args: ListArgs) -> Result<(), AppError> {
    let resource = Resource::from_str(&args.resource)?;
    let client = ApiClient::new(&settings.api)?;
    info!(base_url = %client.base_url(), resource = %resource, "Loading resource");

    let dashboard = Dashboard::new(
        Arc::new(client),
        CacheConfig::from(&settings.cache),
        Arc::new(TracingNotifier),
    )?;
    let _background = dashboard.start_background();

    let query = dashboard.queries().use_resources([resource.key()]);
    let view = query.settled().await;
    let snapshot = view
        .get(resource.as_str())
        .ok_or_else(|| AppError::unexpected(format!("`{resource}` was not mounted")))?;

    let records: Collection = match (&snapshot.data, &snapshot.error) {
        (Some(data), _) => Arc::clone(data),
        (None, Some(error)) => return Err(CacheError::from(error.clone()).into()),
        (None, None) => Arc::from(Vec::<Record>::new()),
    };
    if let Some(error) = &snapshot.error {
        info!(error = %error, "Showing previously cached data after a failed refresh");
    }

    dashboard.mirror().sync();
    info!(
        records = records.len(),
        mirrored = dashboard.mirror().ids(resource.as_str()).len(),
        "Resource loaded"
    );

    let shown = match args.search {
        Some(search) => {
            let fields = if args.fields.is_empty() {
                resource
                    .search_fields()
                    .iter()
                    .map(|field| field.to_string())
                    .collect()
            } else {
                args.fields
            };
            let filter = dashboard.search::<Record, _, _>(fields);
            filter.set_input_value(search);
            filter.flush();
            filter.filtered_data(&records)
        }
        None => records,
    };

    print_json(&*shown)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
