use std::{path::PathBuf, process, sync::Arc};

use futures::future::join_all;
use structopt::StructOpt;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use fedcycle_sdk::{
    client::{new_client, Client},
    settings::{ApiSettings, Settings},
    CoordinatorClient,
    Event,
    EventKind,
    Job,
    JobOutcome,
    JobSettings,
    ListenerError,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "fedcycle-worker")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,

    /// Number of workers taking part in the job
    #[structopt(short = "n", long, default_value = "1")]
    workers: usize,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let job_settings = settings.job_settings().unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        api: api_settings,
        log: log_settings,
        ..
    } = settings;

    FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let client = coordinator_client(&api_settings).unwrap_or_else(|err| {
        error!("failed to create the coordinator client: {}", err);
        process::exit(1);
    });

    let shutdown = CancellationToken::new();
    let jobs = (0..opt.workers.max(1))
        .map(|index| {
            let job = worker_job(job_settings.clone(), client.clone())
                .with_cancellation(shutdown.child_token());
            tokio::spawn(async move { (index, job.run().await) })
        })
        .collect::<Vec<_>>();
    info!("started {} worker(s) against {}", jobs.len(), api_settings.url);

    let all_done = join_all(jobs);
    tokio::pin!(all_done);
    let outcomes = tokio::select! {
        outcomes = &mut all_done => outcomes,
        _ = signal::ctrl_c() => {
            info!("shutting down");
            shutdown.cancel();
            all_done.await
        }
    };

    let mut failed = false;
    for outcome in outcomes {
        match outcome {
            Ok((index, JobOutcome::Completed)) => info!("worker #{} completed its job", index),
            Ok((index, JobOutcome::Cancelled)) => info!("worker #{} was cancelled", index),
            Ok((index, JobOutcome::Failed(e))) => {
                error!("worker #{} failed: {}", index, e);
                failed = true;
            }
            Err(e) => {
                error!("worker task crashed: {}", e);
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}

fn coordinator_client(
    api: &ApiSettings,
) -> Result<Arc<dyn CoordinatorClient>, Box<dyn std::error::Error>> {
    #[cfg(not(feature = "tls"))]
    let http_client = new_client(api.timeout())?;
    #[cfg(feature = "tls")]
    let http_client = {
        let certificates = api
            .certificates
            .as_deref()
            .map(fedcycle_sdk::client::certificates_from)
            .transpose()?;
        new_client(api.timeout(), certificates)?
    };
    Ok(Arc::new(Client::new(http_client, api.url.as_str())?))
}

/// A job whose training step hands the global model back unchanged. Plans are not executed.
fn worker_job(settings: JobSettings, client: Arc<dyn CoordinatorClient>) -> Job {
    Job::new(settings, client)
        .on(EventKind::Accepted, |event: &Event| -> Result<(), ListenerError> {
            if let Event::Accepted(task) = event {
                info!(
                    "training cycle {} ({} plan(s), {} parameter(s))",
                    task.cycle_id(),
                    task.plans().len(),
                    task.model().num_parameters()
                );
                task.report(task.model().clone())
                    .map_err(|e| ListenerError::new(e.to_string()))?;
            }
            Ok(())
        })
        .on(EventKind::Rejected, |event: &Event| -> Result<(), ListenerError> {
            if let Event::Rejected(rejection) = event {
                match rejection.timeout() {
                    Some(timeout) => info!("no cycle available, retrying in {:?}", timeout),
                    None => info!("no more cycles for this worker"),
                }
            }
            Ok(())
        })
        .on(EventKind::Reported, |event: &Event| -> Result<(), ListenerError> {
            if let Event::Reported(cycle_id) = event {
                info!("cycle {} reported", cycle_id);
            }
            Ok(())
        })
        .on(EventKind::Error, |event: &Event| -> Result<(), ListenerError> {
            if let Event::Error(e) = event {
                warn!("job error: {}", e);
            }
            Ok(())
        })
}
