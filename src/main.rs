use poetry_shelf::models::{NewPoem, Poem, PoemDetail};
use poetry_shelf::{App, AppError, Config, Result};

const USAGE: &str = "\
Usage: poetry-shelf <command> [args]

Commands:
  list                                   List poems, newest first
  show <id>                              Show a poem with its comments
  search <query>                         Search title, author and content
  dynasty <name>                         List poems from one dynasty
  popular [limit]                        Most favorited poems
  submit <title> <author> <dynasty> <content>
  local                                  Poems saved on this device only
  register <email> <password> [username]
  reset-password <email>
  favorites                              List your favorites
  favorite <id>                          Add a poem to your favorites
  unfavorite <id>                        Remove a poem from your favorites
  comment <id> <text>                    Comment on a poem

Signed-in commands read POETRY_SHELF_EMAIL and POETRY_SHELF_PASSWORD.";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = Config::load()?;
    let mut app = App::new(&config).await?;

    let result = run(&mut app, command, &args[1..]).await;
    if let Err(e) = &result {
        match app.state().error.as_deref() {
            Some(message) => eprintln!("Error: {message}"),
            None => eprintln!("Error: {e}"),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(app: &mut App, command: &str, args: &[String]) -> Result<()> {
    match (command, args) {
        ("list", []) => print_list(&app.fetch_poems().await?),
        ("show", [id]) => print_detail(&app.fetch_poem(id).await?),
        ("search", [query @ ..]) => print_list(&app.search_poems(&query.join(" ")).await?),
        ("dynasty", [name]) => print_list(&app.poems().poems_by_dynasty(name).await?),
        ("popular", [rest @ ..]) => {
            let limit = match rest {
                [] => 10,
                [n] => n
                    .parse()
                    .map_err(|_| AppError::Validation(format!("not a number: {n}")))?,
                _ => return Err(usage()),
            };
            print_list(&app.poems().popular_poems(limit).await?)
        }
        ("submit", [title, author, dynasty, content @ ..]) if !content.is_empty() => {
            let poem = app
                .submit_poem(NewPoem::new(title, author, dynasty, &content.join("\n")))
                .await?;
            if poem.is_local {
                println!("Saved locally as {} (the backend did not accept it)", poem.id);
            } else {
                println!("Submitted {}", poem.id);
            }
        }
        ("local", []) => print_list(&app.poems().local_submissions().await?),
        ("register", [email, password, rest @ ..]) if rest.len() <= 1 => {
            let username = rest.first().map(String::as_str).unwrap_or_default();
            let outcome = app.register(email, password, username).await?;
            if outcome.requires_email_confirmation {
                println!("Check {email} for a confirmation link before signing in");
            } else {
                println!("Registered as {}", outcome.user.username);
            }
        }
        ("reset-password", [email]) => {
            app.reset_password(email).await?;
            println!("Password reset mail sent to {email}");
        }
        ("favorites", []) => {
            sign_in(app).await?;
            print_list(&app.fetch_favorites().await?);
        }
        ("favorite", [id]) => {
            sign_in(app).await?;
            app.add_to_favorites(id).await?;
            println!("Added {id} to favorites");
        }
        ("unfavorite", [id]) => {
            sign_in(app).await?;
            app.remove_from_favorites(id).await?;
            println!("Removed {id} from favorites");
        }
        ("comment", [id, text @ ..]) if !text.is_empty() => {
            sign_in(app).await?;
            let comment = app.add_comment(id, &text.join(" ")).await?;
            println!("Comment {} posted", comment.id);
        }
        _ => return Err(usage()),
    }
    Ok(())
}

async fn sign_in(app: &mut App) -> Result<()> {
    let email = std::env::var("POETRY_SHELF_EMAIL").map_err(|_| AppError::NotAuthenticated)?;
    let password =
        std::env::var("POETRY_SHELF_PASSWORD").map_err(|_| AppError::NotAuthenticated)?;
    app.login(&email, &password).await?;
    Ok(())
}

fn usage() -> AppError {
    AppError::Other(anyhow::anyhow!("{USAGE}"))
}

fn print_list(poems: &[Poem]) {
    if poems.is_empty() {
        println!("No poems");
        return;
    }
    for poem in poems {
        let marker = if poem.is_local { " [local]" } else { "" };
        println!("{}  {}  {} · {}{}", poem.id, poem.title, poem.dynasty, poem.author, marker);
    }
}

fn print_detail(detail: &PoemDetail) {
    let poem = &detail.poem;
    println!("{}\n{} · {}\n\n{}\n", poem.title, poem.dynasty, poem.author, poem.content);
    for comment in &detail.comments {
        let author = comment
            .author
            .as_ref()
            .and_then(|p| p.username.as_deref())
            .unwrap_or(&comment.user_id);
        println!("[{}] {}: {}", comment.created_at.format("%Y-%m-%d %H:%M"), author, comment.content);
    }
}
