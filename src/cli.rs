use crate::{
    activity::ActivityLog,
    api::ApiClient,
    config::Config,
    models::UserProfile,
    session::AuthError,
    transport::UreqTransport,
    watch::{Poller, Watcher, WatchMessage},
    Args,
};
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::time::{Duration, Instant};

pub struct Context {
    pub args: Args,
    pub config: Config,
    pub client: RefCell<ApiClient>,
    pub activity: RefCell<Option<ActivityLog>>,
    pub session_id: String,
}

impl Context {
    fn log_activity(&self, f: impl FnOnce(&mut ActivityLog) -> Result<()>) {
        if let Some(log) = self.activity.borrow_mut().as_mut() {
            if let Err(e) = f(log) {
                eprintln!("Warning: failed to write activity log: {}", e);
            }
        }
    }
}

pub fn run_once(ctx: &Context, command: &str) -> Result<()> {
    handle_command(ctx, command);
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("txdash - type help for commands, exit to quit");
    if let Some(user) = ctx.client.borrow().session.user() {
        let name = user
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("<unknown>");
        println!("Restored session for {}", name);
    }

    loop {
        match rl.readline("tx> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if handle_command(&ctx, line) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

/// Dispatch one command line. Returns true when the REPL should exit.
fn handle_command(ctx: &Context, line: &str) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return false;
    };
    match command {
        "exit" | "quit" => return true,
        "help" => {
            println!("Commands:");
            println!("  login <email> <password>       - authenticate and store the session");
            println!("  register <user> <email> <pw>   - create an account");
            println!("  logout                         - clear the session");
            println!("  whoami                         - show the current identity and expiry");
            println!("  session                        - show session/activity file info");
            println!("  stats                          - dashboard statistics");
            println!("  funds                          - list funds");
            println!("  fund create <name> <amount> [description...]");
            println!("  txs                            - list transactions");
            println!("  tx create <fund_id> <recipient> <amount>");
            println!("  events                         - list on-chain FundReleased events");
            println!("  watch [seconds]                - poll for new events (default: until Ctrl-C)");
            println!("  exit                           - quit");
        }
        "login" => handle_login(ctx, &parts),
        "register" => handle_register(ctx, &parts),
        "logout" => {
            ctx.client.borrow_mut().session.logout();
            ctx.log_activity(|log| log.logout());
            println!("Logged out");
        }
        "whoami" => handle_whoami(ctx),
        "session" => {
            println!("Session: {}", ctx.session_id);
            println!("API: {}", ctx.client.borrow().base_url());
            match ctx.activity.borrow().as_ref() {
                Some(log) => println!("Activity log: {}", log.path.display()),
                None => println!("Activity log: disabled"),
            }
        }
        "stats" => handle_stats(ctx),
        "funds" => handle_funds(ctx),
        "fund" if parts.get(1) == Some(&"create") => handle_fund_create(ctx, &parts[2..]),
        "fund" => println!("Usage: fund create <name> <amount> [description...]"),
        "txs" | "transactions" => handle_transactions(ctx),
        "tx" if parts.get(1) == Some(&"create") => handle_tx_create(ctx, &parts[2..]),
        "tx" => println!("Usage: tx create <fund_id> <recipient> <amount>"),
        "events" => handle_events(ctx),
        "watch" => handle_watch(ctx, &parts),
        _ => println!("Unknown command: {} (try 'help')", command),
    }
    false
}

/// Print an error, mapping auth failures to a login hint. The session was
/// already cleared by the session manager when these fire.
fn report_error(ctx: &Context, err: anyhow::Error) {
    match err.downcast_ref::<AuthError>() {
        Some(AuthError::Expired) => {
            ctx.log_activity(|log| log.session_expired());
            println!("Session expired. Please log in again.");
        }
        Some(AuthError::Rejected) => {
            ctx.log_activity(|log| log.auth_rejected());
            println!("Session rejected by the server. Please log in again.");
        }
        Some(AuthError::Transport(e)) => {
            eprintln!("Network error: {}", e);
        }
        None => eprintln!("Error: {}", err),
    }
}

fn handle_login(ctx: &Context, parts: &[&str]) {
    if parts.len() != 3 {
        println!("Usage: login <email> <password>");
        return;
    }
    let (email, password) = (parts[1], parts[2]);

    match ctx.client.borrow_mut().login(email, password) {
        Ok(user) => match serde_json::from_value::<UserProfile>(user) {
            Ok(profile) => {
                ctx.log_activity(|log| log.login_ok(&profile.username));
                println!("Logged in as {} ({})", profile.username, profile.role);
            }
            Err(_) => {
                ctx.log_activity(|log| log.login_ok(email));
                println!("Logged in as {}", email);
            }
        },
        Err(e) => {
            ctx.log_activity(|log| log.login_failed(email, &e.to_string()));
            report_error(ctx, e);
        }
    }
}

fn handle_register(ctx: &Context, parts: &[&str]) {
    if parts.len() != 4 {
        println!("Usage: register <username> <email> <password>");
        return;
    }
    let (username, email, password) = (parts[1], parts[2], parts[3]);

    match ctx.client.borrow_mut().register(username, email, password) {
        Ok(message) => {
            ctx.log_activity(|log| log.registered(username, email));
            println!("{} Now: login {} <password>", message, email);
        }
        Err(e) => report_error(ctx, e),
    }
}

fn handle_whoami(ctx: &Context) {
    let client = ctx.client.borrow();
    if !client.session.is_authenticated() {
        println!("Not logged in");
        return;
    }

    match client
        .session
        .user()
        .cloned()
        .and_then(|user| serde_json::from_value::<UserProfile>(user).ok())
    {
        Some(profile) => {
            println!(
                "#{} {} <{}> role={} active={}",
                profile.id, profile.username, profile.email, profile.role, profile.is_active
            );
            if let Some(created) = profile.created_at.as_deref() {
                println!("Registered: {}", created);
            }
        }
        None => println!("<unreadable user record>"),
    }

    match client.session.expires_in() {
        Some(secs) if secs >= 0 => println!("Token expires in {}s", secs),
        Some(secs) => println!("Token expired {}s ago (grace period 60s)", -secs),
        None => println!("Token expiry unreadable"),
    }
}

fn handle_stats(ctx: &Context) {
    match ctx.client.borrow_mut().dashboard_stats() {
        Ok(stats) => {
            println!("Funds:                  {}", stats.total_funds);
            println!("Transactions:           {}", stats.total_transactions);
            println!("Completed transactions: {}", stats.completed_transactions);
            println!("Blockchain balance:     {:.4} ETH", stats.blockchain_balance);
        }
        Err(e) => report_error(ctx, e),
    }
}

fn handle_funds(ctx: &Context) {
    match ctx.client.borrow_mut().funds() {
        Ok(funds) => {
            if funds.is_empty() {
                println!("No funds yet. Create one with: fund create <name> <amount>");
                return;
            }
            for fund in funds {
                println!(
                    "#{} {} [{}] {:.4}/{:.4} ETH remaining",
                    fund.id, fund.name, fund.status, fund.remaining_amount, fund.total_amount
                );
                if let Some(description) = fund.description.as_deref() {
                    if !description.is_empty() {
                        println!("    {}", description);
                    }
                }
                if let Some(created) = fund.created_at.as_deref() {
                    println!("    created {}", created);
                }
            }
        }
        Err(e) => report_error(ctx, e),
    }
}

fn handle_fund_create(ctx: &Context, args: &[&str]) {
    if args.len() < 2 {
        println!("Usage: fund create <name> <amount> [description...]");
        return;
    }
    let name = args[0];
    let Ok(amount) = args[1].parse::<f64>() else {
        println!("Invalid amount: {}", args[1]);
        return;
    };
    let description = if args.len() > 2 {
        Some(args[2..].join(" "))
    } else {
        None
    };

    match ctx
        .client
        .borrow_mut()
        .create_fund(name, description.as_deref(), amount)
    {
        Ok(message) => {
            ctx.log_activity(|log| log.fund_created(name, amount));
            println!("{}", message);
        }
        Err(e) => report_error(ctx, e),
    }
}

fn handle_transactions(ctx: &Context) {
    match ctx.client.borrow_mut().transactions() {
        Ok(txs) => {
            if txs.is_empty() {
                println!("No transactions yet.");
                return;
            }
            for tx in txs {
                let hash = tx.transaction_hash.as_deref().unwrap_or("-");
                let created = tx.created_at.as_deref().unwrap_or("-");
                println!(
                    "#{} fund {} -> {} {:.4} ETH [{}] {} ({})",
                    tx.id, tx.fund_id, tx.recipient_address, tx.amount, tx.status, hash, created
                );
                if let Some(block) = tx.block_number {
                    println!("    mined in block {}", block);
                }
            }
        }
        Err(e) => report_error(ctx, e),
    }
}

fn handle_tx_create(ctx: &Context, args: &[&str]) {
    if args.len() != 3 {
        println!("Usage: tx create <fund_id> <recipient> <amount>");
        return;
    }
    let Ok(fund_id) = args[0].parse::<u64>() else {
        println!("Invalid fund id: {}", args[0]);
        return;
    };
    let recipient = args[1];
    let Ok(amount) = args[2].parse::<f64>() else {
        println!("Invalid amount: {}", args[2]);
        return;
    };

    match ctx
        .client
        .borrow_mut()
        .create_transaction(fund_id, recipient, amount)
    {
        Ok(message) => {
            ctx.log_activity(|log| log.transaction_created(fund_id, recipient, amount));
            println!("{}", message);
        }
        Err(e) => report_error(ctx, e),
    }
}

fn handle_events(ctx: &Context) {
    match ctx.client.borrow_mut().chain_events() {
        Ok(events) => {
            if events.is_empty() {
                println!("No FundReleased events observed yet.");
                return;
            }
            ctx.log_activity(|log| log.events_seen(events.len()));
            for event in events {
                print_event(&event);
            }
        }
        Err(e) => report_error(ctx, e),
    }
}

fn print_event(event: &crate::models::ChainEvent) {
    let block = event
        .block_number
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "FundReleased -> {} {:.4} ETH (block {}, tx {})",
        event.recipient, event.amount, block, event.transaction_hash
    );
}

fn handle_watch(ctx: &Context, parts: &[&str]) {
    let duration_secs = match parts.get(1) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) => Some(secs),
            Err(_) => {
                println!("Usage: watch [seconds]");
                return;
            }
        },
        None => None,
    };

    let (token, expires_at, url) = {
        let client = ctx.client.borrow();
        if client.session.is_expired() {
            drop(client);
            ctx.client.borrow_mut().session.logout();
            ctx.log_activity(|log| log.session_expired());
            println!("Session expired. Please log in again.");
            return;
        }
        let Some(expires_at) = client.session.expires_at() else {
            println!("Token expiry unreadable; not watching.");
            return;
        };
        let token = client.session.token().unwrap_or_default().to_string();
        let url = format!("{}/blockchain/events", client.base_url());
        (token, expires_at, url)
    };

    let interval = ctx.config.watch.poll_interval_secs;
    let poller = Poller::new(Box::new(UreqTransport::new()), &url, &token, expires_at);
    let mut watcher = Watcher::spawn(poller, Duration::from_secs(interval));

    ctx.log_activity(|log| log.watch_started(interval));
    match duration_secs {
        Some(secs) => println!("Watching for events every {}s for {}s...", interval, secs),
        None => println!("Watching for events every {}s (Ctrl-C to quit)...", interval),
    }

    let deadline = duration_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    let stop_reason = loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break "duration elapsed";
            }
        }
        match watcher.rx.recv_timeout(Duration::from_millis(250)) {
            Ok(WatchMessage::Events(events)) => {
                ctx.log_activity(|log| log.events_seen(events.len()));
                for event in &events {
                    print_event(event);
                }
            }
            Ok(WatchMessage::Expired) => {
                ctx.client.borrow_mut().session.logout();
                ctx.log_activity(|log| log.session_expired());
                println!("Session expired. Please log in again.");
                break "session expired";
            }
            Ok(WatchMessage::Rejected) => {
                ctx.client.borrow_mut().session.logout();
                ctx.log_activity(|log| log.auth_rejected());
                println!("Session rejected by the server. Please log in again.");
                break "auth rejected";
            }
            Ok(WatchMessage::PollFailed(reason)) => {
                eprintln!("Poll failed: {}", reason);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break "watcher stopped",
        }
    };

    watcher.stop();
    ctx.log_activity(|log| log.watch_stopped(stop_reason));
}
