//! One-shot sweep: analyze every watched subreddit and print a theme summary.
//!
//! Usage: `sweep [--ideas] [SUBREDDIT...]`. Without names, the stored
//! watchlist is swept.

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use subreddit_insights::pipeline::Analysis;

#[derive(Parser, Debug)]
#[command(name = "sweep", about = "Analyze watched subreddits and print theme summaries")]
struct Args {
    /// Also synthesize startup ideas for each subreddit
    #[arg(long, default_value_t = false)]
    ideas: bool,
    /// Subreddits to sweep; defaults to the stored watchlist
    subreddits: Vec<String>,
}

fn print_summary(subreddit: &str, analysis: &Analysis) {
    println!("r/{subreddit}: {} posts", analysis.posts.len());
    for theme in &analysis.themes {
        println!("  {:<20} {:>4}", theme.name, theme.count);
        for item in theme.posts.iter().take(3) {
            println!("      - {}", item.post.title);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let with_ideas = args.ideas;
    let mut names = args.subreddits;

    let (pipeline, watchlist) = subreddit_insights::bootstrap()?;
    if names.is_empty() {
        names = watchlist.list().iter().map(|s| s.name.clone()).collect();
    }

    let mut failures = 0usize;
    for name in &names {
        let analysis = match pipeline.analyze(name).await {
            Ok(a) => a,
            Err(e) => {
                error!(subreddit = %name, error = %e, "sweep failed for subreddit");
                failures += 1;
                continue;
            }
        };
        print_summary(name, &analysis);

        if with_ideas {
            match pipeline.ideas(&analysis.posts).await {
                Ok(ideas) => {
                    for (i, idea) in ideas.iter().enumerate() {
                        println!("\n  Idea {} ({} related posts)", i + 1, idea.related_posts.len());
                        for line in idea.idea.lines() {
                            println!("    {line}");
                        }
                    }
                }
                Err(e) => error!(subreddit = %name, error = %e, "idea synthesis failed"),
            }
        }
        println!();
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} subreddits failed", names.len());
    }
    Ok(())
}
