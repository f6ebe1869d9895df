use channel_collector_lib::{logger, prompt};
use channel_collector_lib::{
    Collector, CollectionSettings, CollectorConfig, CollectorError, DelayManager, FileStore,
    HttpDirectory, RunOutcome,
};

use std::error::Error;
use std::io;
use std::sync::atomic::Ordering;
use log::{info, warn};

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    info!("Starting Channel Collector...");

    let config = CollectorConfig::load().map_err(CollectorError::from)?;

    // 1. Session and channel
    let directory = HttpDirectory::new(&config).map_err(CollectorError::from)?;
    let account = directory.authorize().map_err(CollectorError::from)?;
    info!("Authorized as {}", account.first_name.as_deref().unwrap_or("<unnamed>"));
    let channel = directory.resolve_channel().map_err(CollectorError::from)?;
    info!("Channel: {}", channel.title);

    // 2. Store
    let store = FileStore::open(&config.output_dir, config.channel_name()).map_err(CollectorError::from)?;
    let delay = DelayManager::new(config.jitter_secs);
    let stop = delay.stop_flag();
    let mut collector = Collector::new(directory, store, CollectionSettings::from(&config), delay);

    // 3. Plan and confirm
    let state = collector.prepare();
    if state.remaining().is_empty() {
        info!("All letters already processed!");
        return Ok(());
    }

    info!("Records so far: {}", state.total_before());
    info!("Letters remaining: {}", state.remaining().len());
    info!("Delay between requests: {} s", config.delay_between_requests);
    info!("Batch: {} requests, then a {} s pause", config.batch_size, config.batch_pause);
    info!("Daily limit: {} requests", config.daily_limit);
    info!("Record table: {}", collector.store().table_path().display());

    if config.confirm_before_run {
        let question = format!("Start collection ({} letters remaining)?", state.remaining().len());
        let confirmed = prompt::confirm(&question, &mut io::stdin().lock(), &mut io::stdout())
            .map_err(CollectorError::from)?;
        if !confirmed {
            info!("Cancelled");
            return Ok(());
        }
    }

    // 4. Collect; from here on Ctrl-C only requests a stop
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(CollectorError::from)?;

    match collector.collect(state) {
        RunOutcome::AlreadyComplete | RunOutcome::Completed(_) => {}
        RunOutcome::DailyLimitReached(summary) => {
            info!(
                "Paused until the request window rolls over: {} new records, {} requests used.",
                summary.new_found, summary.requests_this_window
            );
        }
        RunOutcome::Interrupted(summary) => {
            warn!(
                "Stopped by user. Saved {} new records, {} letters this session.",
                summary.new_found, summary.tokens_processed
            );
        }
    }

    Ok(())
}
