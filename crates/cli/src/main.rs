//! # storytrack: the StoryTrack command-line client
//!
//! Browse the catalog, keep a reading list, comment on books and get
//! recommendations from the terminal.

mod config;
mod session;
mod ui;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{get_config, CliConfig};
use std::fs::File;
use storytrack::data;
use storytrack::geo::{sort_stores_by_distance, Coordinates};
use storytrack::providers::backend::{
    ChangeEvent, ChangeKind, RestAuthProvider, RestTableProvider, Subscription,
};
use storytrack::types::{CatalogFilter, CatalogSort, Comment, Feedback, ReadStatus};
use storytrack::{StoryTrackClient, Store, Theme};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

// --- CLI Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a YAML config file (defaults to ./storytrack.yml)
    #[arg(long, global = true, env = "STORYTRACK_CONFIG")]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account
    Signup(SignupArgs),
    /// Sign in with email and password
    Login(LoginArgs),
    /// Sign out and forget the stored session
    Logout,
    /// Request a reset code, or complete a reset with --token
    ResetPassword(ResetPasswordArgs),
    /// Show the signed-in account
    Whoami,
    /// Browse the catalog
    Books(BooksArgs),
    /// Fuzzy-search the catalog by title, author or genre
    Search(SearchArgs),
    /// List the genres found in the catalog
    Genres,
    /// Show one book
    Show(BookIdArgs),
    /// Rate a book from 1 to 5
    Rate(RateArgs),
    /// Toggle a book in your favorites
    Favorite(BookIdArgs),
    /// Set your reading status for a book
    Status(StatusArgs),
    /// Show your reading list
    List(ListArgs),
    /// Reorder your reading list
    Reorder(ReorderArgs),
    /// Comment on a book; @username mentions another reader
    Comment(CommentArgs),
    /// Show a book's comments
    Comments(CommentsArgs),
    /// Show personalised recommendations
    Recommend(RecommendArgs),
    /// Hide a recommendation
    Dismiss(BookIdArgs),
    /// Like or dislike a recommendation
    Feedback(FeedbackArgs),
    /// Show your reading statistics
    Stats,
    /// List partner bookstores, nearest first
    Stores(StoresArgs),
    /// Show or change the colour theme
    Theme(ThemeArgs),
}

#[derive(Parser, Debug)]
struct SignupArgs {
    #[arg(long)]
    email: String,
    #[arg(long, env = "STORYTRACK_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    username: String,
}

#[derive(Parser, Debug)]
struct LoginArgs {
    #[arg(long)]
    email: String,
    #[arg(long, env = "STORYTRACK_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Parser, Debug)]
struct ResetPasswordArgs {
    #[arg(long)]
    email: String,
    /// The code from the reset email
    #[arg(long, requires = "new_password")]
    token: Option<String>,
    #[arg(long)]
    new_password: Option<String>,
    /// Where the emailed link should point
    #[arg(long)]
    redirect_to: Option<String>,
}

#[derive(Parser, Debug)]
struct BooksArgs {
    #[arg(long)]
    genre: Option<String>,
    /// Only titles containing this text
    #[arg(long)]
    title: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: usize,
    /// title, rating or popular
    #[arg(long, default_value = "title")]
    sort: CatalogSort,
}

#[derive(Parser, Debug)]
struct SearchArgs {
    query: String,
}

#[derive(Parser, Debug)]
struct BookIdArgs {
    book_id: String,
}

#[derive(Parser, Debug)]
struct RateArgs {
    book_id: String,
    #[arg(value_parser = clap::value_parser!(u8).range(1..=5))]
    rating: u8,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    book_id: String,
    /// none, reading or finished
    status: ReadStatus,
}

#[derive(Parser, Debug)]
struct ListArgs {
    /// Only entries with this status
    #[arg(long)]
    status: Option<ReadStatus>,
    /// Keep running and print changes as they happen
    #[arg(long)]
    follow: bool,
}

#[derive(Parser, Debug)]
struct ReorderArgs {
    /// Book ids in the new order
    #[arg(required = true)]
    book_ids: Vec<String>,
}

#[derive(Parser, Debug)]
struct CommentArgs {
    book_id: String,
    text: String,
}

#[derive(Parser, Debug)]
struct CommentsArgs {
    book_id: String,
    /// Keep running and print new comments as they arrive
    #[arg(long)]
    follow: bool,
}

#[derive(Parser, Debug)]
struct RecommendArgs {
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Parser, Debug)]
struct FeedbackArgs {
    book_id: String,
    /// like or dislike
    feedback: Feedback,
}

#[derive(Parser, Debug)]
struct StoresArgs {
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
}

#[derive(Parser, Debug)]
struct ThemeArgs {
    /// light, dark, system or toggle
    choice: Option<String>,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Signup(_) => "Signup",
            Commands::Login(_) => "Login",
            Commands::Logout => "Logout",
            Commands::ResetPassword(_) => "Password reset",
            Commands::Whoami => "Whoami",
            Commands::Books(_) => "Books",
            Commands::Search(_) => "Search",
            Commands::Genres => "Genres",
            Commands::Show(_) => "Show",
            Commands::Rate(_) => "Rate",
            Commands::Favorite(_) => "Favorite",
            Commands::Status(_) => "Status",
            Commands::List(_) => "List",
            Commands::Reorder(_) => "Reorder",
            Commands::Comment(_) => "Comment",
            Commands::Comments(_) => "Comments",
            Commands::Recommend(_) => "Recommend",
            Commands::Dismiss(_) => "Dismiss",
            Commands::Feedback(_) => "Feedback",
            Commands::Stats => "Stats",
            Commands::Stores(_) => "Stores",
            Commands::Theme(_) => "Theme",
        }
    }
}

// --- Main Application Entry ---

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Setup logging to a file
    let log_file = File::create("storytrack-cli.log")?;
    let subscriber = fmt::Subscriber::builder()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let name = cli.command.name();

    if let Err(e) = run(cli).await {
        eprintln!("{name} failed: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = get_config(cli.config.as_deref())?;

    // Commands that never touch the backend.
    match &cli.command {
        Commands::Stores(args) => return handle_stores(&config, args),
        Commands::Theme(args) => return handle_theme(&config, args).await,
        _ => {}
    }

    let client = build_client(&config).await?;

    match cli.command {
        Commands::Signup(args) => handle_signup(&client, &args).await,
        Commands::Login(args) => handle_login(&client, &args).await,
        Commands::Logout => handle_logout(&client).await,
        Commands::ResetPassword(args) => handle_reset_password(&client, &args).await,
        Commands::Whoami => {
            restore_session(&client).await;
            match client.session().await {
                Some(session) => ui::print_session(&session),
                None => println!("Not signed in."),
            }
            Ok(())
        }
        Commands::Books(args) => handle_books(&client, &args).await,
        Commands::Search(args) => handle_search(&client, &args).await,
        Commands::Genres => {
            let mut books = Vec::new();
            let mut page = 1;
            loop {
                let loaded = client.load_catalog(&CatalogFilter::default(), page).await?;
                books.extend(loaded.items);
                if !loaded.pagination.has_next() {
                    break;
                }
                page += 1;
            }
            for genre in data::list_genres(&books) {
                println!("{genre}");
            }
            Ok(())
        }
        Commands::Show(args) => handle_show(&client, &args).await,
        Commands::Rate(args) => {
            require_session(&client).await?;
            let entry = client.rate(&args.book_id, args.rating).await?;
            println!("Rated {} {}", entry.book_id, "★".repeat(args.rating as usize));
            Ok(())
        }
        Commands::Favorite(args) => {
            require_session(&client).await?;
            prime_library(&client).await?;
            let favorite = client.toggle_favorite(&args.book_id).await?;
            if favorite {
                println!("Added {} to your favorites.", args.book_id);
            } else {
                println!("Removed {} from your favorites.", args.book_id);
            }
            Ok(())
        }
        Commands::Status(args) => {
            require_session(&client).await?;
            prime_library(&client).await?;
            client.set_status(&args.book_id, args.status).await?;
            println!("Marked {} as {}.", args.book_id, args.status);
            Ok(())
        }
        Commands::List(args) => handle_list(&client, &args).await,
        Commands::Reorder(args) => {
            require_session(&client).await?;
            let entries = client.reorder(&args.book_ids).await?;
            let books = data::fetch_books_by_ids(client.tables.as_ref(), &args.book_ids).await?;
            ui::print_reading_list(&entries, &books);
            Ok(())
        }
        Commands::Comment(args) => {
            require_session(&client).await?;
            let comment = client.post_comment(&args.book_id, &args.text).await?;
            println!("{}", ui::comment_line(&comment));
            Ok(())
        }
        Commands::Comments(args) => handle_comments(&client, &args).await,
        Commands::Recommend(args) => {
            require_session(&client).await?;
            let limit = args.limit.unwrap_or(config.recommendation_limit);
            let recs = client.recommendations(Some(limit)).await?;
            ui::print_recommendations(&recs);
            Ok(())
        }
        Commands::Dismiss(args) => {
            require_session(&client).await?;
            client.dismiss(&args.book_id).await?;
            println!("Dismissed {}.", args.book_id);
            Ok(())
        }
        Commands::Feedback(args) => {
            require_session(&client).await?;
            client.feedback(&args.book_id, args.feedback).await?;
            println!("Thanks for the feedback.");
            Ok(())
        }
        Commands::Stats => {
            require_session(&client).await?;
            let stats = client.stats().await?;
            ui::print_stats(&stats);
            Ok(())
        }
        Commands::Stores(_) | Commands::Theme(_) => Ok(()),
    }
}

// --- Client Setup ---

async fn build_client(config: &CliConfig) -> Result<StoryTrackClient> {
    let (backend_url, anon_key) = config.backend()?;
    let tables = RestTableProvider::new(backend_url.to_string(), anon_key.to_string())?;
    let auth = RestAuthProvider::new(backend_url.to_string(), anon_key.to_string())?;
    let store = Store::with_data_dir(&config.data_dir).await;

    let client = StoryTrackClient::builder()
        .table_provider(Box::new(tables))
        .auth_provider(Box::new(auth))
        .realtime_url(config.realtime_url().to_string())
        .anon_key(anon_key.to_string())
        .store(store)
        .page_size(config.page_size)
        .build()?;
    Ok(client)
}

/// Re-validates the keyring session. A rejected one is forgotten.
async fn restore_session(client: &StoryTrackClient) {
    let Some(saved) = session::load() else {
        return;
    };
    match client.restore_session(saved).await {
        Ok(restored) => {
            if let Err(e) = session::save(&restored) {
                warn!("Could not update the stored session: {:#}", e);
            }
        }
        Err(e) => {
            warn!("Stored session rejected: {}", e);
            if let Err(e) = session::clear() {
                warn!("{:#}", e);
            }
        }
    }
}

async fn require_session(client: &StoryTrackClient) -> Result<()> {
    restore_session(client).await;
    if client.session().await.is_none() {
        bail!("You are not signed in. Please run `storytrack login` first.");
    }
    Ok(())
}

/// Loads the reading list into the store so toggles start from the stored state.
async fn prime_library(client: &StoryTrackClient) -> Result<()> {
    let entries = client.reading_list(None).await?;
    client.store.books.write().await.set_library(&entries);
    Ok(())
}

// --- Command Handlers ---

async fn handle_signup(client: &StoryTrackClient, args: &SignupArgs) -> Result<()> {
    let signup = client
        .sign_up(&args.email, &args.password, &args.username)
        .await?;
    match &signup.session {
        Some(session) => {
            session::save(session)?;
            info!(user_id = %session.user.id, "Signed up");
            println!("Welcome, {}! You are signed in.", args.username);
        }
        None => println!("Check your inbox to confirm your email address, then log in."),
    }
    Ok(())
}

async fn handle_login(client: &StoryTrackClient, args: &LoginArgs) -> Result<()> {
    let session = client.sign_in(&args.email, &args.password).await?;
    session::save(&session)?;
    println!(
        "Signed in as {}.",
        session.user.username().unwrap_or(&args.email)
    );
    Ok(())
}

async fn handle_logout(client: &StoryTrackClient) -> Result<()> {
    restore_session(client).await;
    client.sign_out().await?;
    session::clear()?;
    println!("Signed out.");
    Ok(())
}

async fn handle_reset_password(client: &StoryTrackClient, args: &ResetPasswordArgs) -> Result<()> {
    match (&args.token, &args.new_password) {
        (None, _) => {
            client
                .request_password_reset(&args.email, args.redirect_to.as_deref())
                .await?;
            println!("If that address has an account, a reset code is on its way.");
            println!(
                "Then run `storytrack reset-password --email {} --token <code> --new-password <password>`.",
                args.email
            );
        }
        (Some(token), Some(new_password)) => {
            client
                .complete_password_reset(&args.email, token, new_password)
                .await?;
            if let Some(session) = client.session().await {
                session::save(&session)?;
            }
            println!("Password updated. You are signed in.");
        }
        (Some(_), None) => bail!("--new-password is required with --token"),
    }
    Ok(())
}

async fn handle_books(client: &StoryTrackClient, args: &BooksArgs) -> Result<()> {
    restore_session(client).await;
    let filter = CatalogFilter {
        genre: args.genre.clone(),
        title_contains: args.title.clone(),
        sort: args.sort,
    };
    let page = client.load_catalog(&filter, args.page).await?;
    let books = client.store.books.read().await;
    ui::print_catalog(&page, &books);
    Ok(())
}

async fn handle_search(client: &StoryTrackClient, args: &SearchArgs) -> Result<()> {
    let hits = client.search_catalog(&args.query).await?;
    ui::print_search_hits(&hits);
    Ok(())
}

async fn handle_show(client: &StoryTrackClient, args: &BookIdArgs) -> Result<()> {
    restore_session(client).await;
    let book = client
        .book(&args.book_id)
        .await?
        .with_context(|| format!("No book with id '{}'", args.book_id))?;
    let entry = match client.store.user_id().await {
        Some(user_id) => {
            data::get_user_book(client.tables.as_ref(), &user_id, &book.id).await?
        }
        None => None,
    };
    ui::print_book(&book, entry.as_ref());
    Ok(())
}

async fn handle_list(client: &StoryTrackClient, args: &ListArgs) -> Result<()> {
    require_session(client).await?;
    let entries = client.reading_list(args.status).await?;
    let ids: Vec<String> = entries.iter().map(|e| e.book_id.clone()).collect();
    let books = data::fetch_books_by_ids(client.tables.as_ref(), &ids).await?;
    ui::print_reading_list(&entries, &books);

    if args.follow {
        let subscription = client.subscribe_reading_list().await?;
        println!("\nWatching for changes (Ctrl-C to stop)...");
        follow(subscription, |event| {
            let book_id = event.record["book_id"]
                .as_str()
                .or_else(|| event.old_record["book_id"].as_str())
                .unwrap_or("?");
            let status = event.record["read_status"].as_str().unwrap_or("-");
            println!("{:?} {book_id} ({status})", event.kind);
        })
        .await;
    }
    Ok(())
}

async fn handle_comments(client: &StoryTrackClient, args: &CommentsArgs) -> Result<()> {
    restore_session(client).await;
    let comments = client.comments(&args.book_id).await?;
    ui::print_comments(&comments);

    if args.follow {
        let subscription = client.subscribe_comments(&args.book_id).await?;
        println!("\nWaiting for new comments (Ctrl-C to stop)...");
        follow(subscription, |event| {
            if event.kind != ChangeKind::Insert {
                return;
            }
            match event.decode_record::<Comment>() {
                Ok(comment) => println!("{}", ui::comment_line(&comment)),
                Err(e) => warn!("Skipping undecodable comment: {}", e),
            }
        })
        .await;
    }
    Ok(())
}

/// Prints events until the channel closes or the user interrupts.
async fn follow<F>(mut subscription: Subscription, mut on_event: F)
where
    F: FnMut(&ChangeEvent),
{
    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => on_event(&event),
                None => {
                    println!("Connection closed.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    subscription.unsubscribe().await;
}

fn handle_stores(config: &CliConfig, args: &StoresArgs) -> Result<()> {
    if !(-90.0..=90.0).contains(&args.lat) || !(-180.0..=180.0).contains(&args.lon) {
        bail!("coordinates out of range: {}, {}", args.lat, args.lon);
    }
    let ranked = sort_stores_by_distance(&config.stores, Coordinates::new(args.lat, args.lon));
    ui::print_stores(&ranked);
    Ok(())
}

async fn handle_theme(config: &CliConfig, args: &ThemeArgs) -> Result<()> {
    let store = Store::with_data_dir(&config.data_dir).await;
    let mut theme = store.theme.write().await;
    let current = match args.choice.as_deref() {
        None => theme.theme,
        Some("toggle") => theme.toggle().await?,
        Some(choice) => {
            let choice: Theme = choice.parse()?;
            theme.set(choice).await?
        }
    };
    println!("Theme: {}", theme_name(current));
    Ok(())
}

fn theme_name(theme: Theme) -> &'static str {
    match theme {
        Theme::Light => "light",
        Theme::Dark => "dark",
        Theme::System => "system",
    }
}
