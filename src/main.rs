use anyhow::{anyhow, bail, Context, Result};
use log::warn;

use quill::api;
use quill::comments;
use quill::config;
use quill::engagement::Engagement;
use quill::feed::ArticleWithAuthor;
use quill::session::Identity;
use quill::App;

const USAGE: &str = "Quill — publish and read articles from the terminal.

Usage: quill <command> [args]

Commands:
  register <name> <email> <password> [bio]   Create an account
  login <email> <password>                   Sign in and keep the session
  logout                                     Sign out
  whoami [--remote]                          Show the signed-in profile
  feed [page]                                List a feed page (zero-based)
  article <id>                               Show an article and its comments
  author <user-id>                           List a user's articles
  comment <article-id> <text...>             Comment on an article
  like <article-id>                          Like an article
  unlike <article-id>                        Remove a like
  toggle <article-id>                        Flip the like state
  post <title> <category-id> <body...>       Publish an article

Flags:
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

fn main() {
    if handle_cli_flags() {
        return;
    }

    if let Err(err) = run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("quill {}", quill::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;

    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let _logger = flexi_logger::Logger::try_with_env_or_str(&cfg.log.level)
        .context("configure logging")?
        .start()
        .context("start logging")?;

    let app = App::open(cfg).context("start client")?;
    let outcome = execute(&app, command);
    if let Err(err) = app.close() {
        warn!("shutdown: {err:#}");
    }
    outcome
}

enum Command {
    Register {
        name: String,
        email: String,
        password: String,
        bio: String,
    },
    Login {
        email: String,
        password: String,
    },
    Logout,
    Whoami {
        remote: bool,
    },
    Feed {
        page: u32,
    },
    Article {
        id: i64,
    },
    Author {
        user_id: i64,
    },
    Comment {
        article_id: i64,
        text: String,
    },
    Like {
        article_id: i64,
    },
    Unlike {
        article_id: i64,
    },
    Toggle {
        article_id: i64,
    },
    Post {
        title: String,
        category_id: i64,
        body: String,
    },
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some(name) = args.first() else {
        bail!("no command given; run quill --help for usage");
    };
    let rest = &args[1..];
    let command = match name.as_str() {
        "register" => Command::Register {
            name: required(rest, 0, "name")?.to_string(),
            email: required(rest, 1, "email")?.to_string(),
            password: required(rest, 2, "password")?.to_string(),
            bio: rest.get(3).cloned().unwrap_or_default(),
        },
        "login" => Command::Login {
            email: required(rest, 0, "email")?.to_string(),
            password: required(rest, 1, "password")?.to_string(),
        },
        "logout" => Command::Logout,
        "whoami" => Command::Whoami {
            remote: rest.iter().any(|arg| arg == "--remote"),
        },
        "feed" => Command::Feed {
            page: match rest.first() {
                Some(raw) => raw.parse().context("page must be a number")?,
                None => 0,
            },
        },
        "article" => Command::Article {
            id: numeric(rest, 0, "article id")?,
        },
        "author" => Command::Author {
            user_id: numeric(rest, 0, "user id")?,
        },
        "comment" => Command::Comment {
            article_id: numeric(rest, 0, "article id")?,
            text: joined(rest, 1, "comment text")?,
        },
        "like" => Command::Like {
            article_id: numeric(rest, 0, "article id")?,
        },
        "unlike" => Command::Unlike {
            article_id: numeric(rest, 0, "article id")?,
        },
        "toggle" => Command::Toggle {
            article_id: numeric(rest, 0, "article id")?,
        },
        "post" => Command::Post {
            title: required(rest, 0, "title")?.to_string(),
            category_id: numeric(rest, 1, "category id")?,
            body: joined(rest, 2, "article body")?,
        },
        other => bail!("unknown command {other:?}; run quill --help for usage"),
    };
    Ok(command)
}

fn required<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing {name}; run quill --help for usage"))
}

fn numeric(args: &[String], index: usize, name: &str) -> Result<i64> {
    required(args, index, name)?
        .parse()
        .with_context(|| format!("{name} must be a number"))
}

fn joined(args: &[String], from: usize, name: &str) -> Result<String> {
    let text = args.get(from..).unwrap_or_default().join(" ");
    if text.trim().is_empty() {
        bail!("missing {name}; run quill --help for usage");
    }
    Ok(text)
}

fn execute(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Register {
            name,
            email,
            password,
            bio,
        } => {
            let id = app.register(&api::Registration {
                name,
                password,
                bio,
                email,
            })?;
            println!("registered user {id}; sign in with: quill login <email> <password>");
        }
        Command::Login { email, password } => {
            let identity = app.login(&email, &password)?;
            println!("signed in as {} (user {})", identity.name, identity.id);
        }
        Command::Logout => {
            app.logout()?;
            println!("signed out");
        }
        Command::Whoami { remote } => {
            if remote {
                app.refresh_profile()?;
            }
            match app.session().current() {
                Some(identity) => print_identity(&identity),
                None => println!("not signed in"),
            }
        }
        Command::Feed { page } => {
            let page = app.paginator().fetch_page(page)?;
            for entry in &page.items {
                let engagement = app.coordinator().engagement(entry.article.id);
                println!(
                    "#{} {} — {} [{} likes]",
                    entry.article.id, entry.article.title, entry.author.name, engagement.like_count
                );
            }
            if page.items.is_empty() {
                println!("(no articles on page {})", page.number);
            }
            let tail = if page.is_last { ", end of feed" } else { "" };
            println!("page {} of {} pages{}", page.number, page.total_pages, tail);
        }
        Command::Article { id } => {
            let entry = app.paginator().detail(id)?;
            // The detail payload has no per-user flag; ask the backend while
            // a session is available.
            if app.session().is_authenticated() {
                if let Err(err) = app.coordinator().refresh(id) {
                    warn!("could not refresh like status for article {id}: {err:#}");
                }
            }
            print_article(&entry, app.coordinator().engagement(id));
            let thread = app.comment_thread(id)?;
            if !thread.is_empty() {
                println!();
                let plural = if thread.len() == 1 { "" } else { "s" };
                println!("{} comment{plural}:", thread.len());
                for comment in &thread {
                    print_comment(comment);
                }
            }
        }
        Command::Author { user_id } => {
            let articles = app.paginator().by_author(user_id)?;
            if articles.is_empty() {
                println!("(no articles by user {user_id})");
            }
            for article in &articles {
                let engagement = app.coordinator().engagement(article.id);
                println!(
                    "#{} {} [{} likes]",
                    article.id, article.title, engagement.like_count
                );
            }
        }
        Command::Comment { article_id, text } => {
            let mut thread = app.comment_thread(article_id)?;
            let created = app.post_comment(article_id, &text)?;
            comments::append_created(&mut thread, created);
            if let Some(posted) = thread.last() {
                print_comment(posted);
            }
        }
        Command::Like { article_id } => {
            report_engagement(article_id, app.coordinator().like(article_id)?);
        }
        Command::Unlike { article_id } => {
            report_engagement(article_id, app.coordinator().unlike(article_id)?);
        }
        Command::Toggle { article_id } => {
            report_engagement(article_id, app.coordinator().toggle(article_id)?);
        }
        Command::Post {
            title,
            category_id,
            body,
        } => {
            let id = app.publish(&title, &body, category_id)?;
            println!("published article {id}");
        }
    }
    Ok(())
}

fn report_engagement(article_id: i64, settled: Engagement) {
    let state = if settled.is_liked() {
        "liked"
    } else {
        "not liked"
    };
    println!("article {article_id}: {state} [{} likes]", settled.like_count);
}

fn print_identity(identity: &Identity) {
    println!("{} (user {})", identity.name, identity.id);
    println!("email: {}", identity.email);
    if !identity.bio.is_empty() {
        println!("bio: {}", identity.bio);
    }
    if let Some(joined) = identity.joined_at {
        println!("joined: {}", joined.format("%Y-%m-%d"));
    }
    println!(
        "followers: {}  following: {}",
        identity.followers, identity.following
    );
}

fn print_article(entry: &ArticleWithAuthor, engagement: Engagement) {
    let article = &entry.article;
    println!("#{} {}", article.id, article.title);
    match article.created_at {
        Some(at) => println!(
            "by {} on {}",
            entry.author.name,
            at.format("%Y-%m-%d %H:%M")
        ),
        None => println!("by {}", entry.author.name),
    }
    let yours = if engagement.is_liked() {
        " (including yours)"
    } else {
        ""
    };
    println!("{} likes{yours}", engagement.like_count);
    if !article.body.is_empty() {
        println!();
        println!("{}", article.body);
    }
}

fn print_comment(comment: &comments::Comment) {
    match comment.created_time() {
        Some(at) => println!("{} on {}:", comment.author_name, at.format("%Y-%m-%d %H:%M")),
        None => println!("{}:", comment.author_name),
    }
    if let Some(excerpt) = &comment.parent_excerpt {
        match &comment.parent_author {
            Some(author) => println!("  > {author}: {excerpt}"),
            None => println!("  > {excerpt}"),
        }
    }
    println!("  {}", comment.content);
}
