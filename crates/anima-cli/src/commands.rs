//! Command handlers.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use tracing::warn;

use anima_core::api::{ApiError, Recommendations, RECOMMENDATION_EMOTIONS};
use anima_core::guard::DEFAULT_HOME_PATH;
use anima_core::{Admission, Config, SessionManager, SessionState, Severity, SignInRedirect};

use crate::validation::{is_valid_email, is_valid_recovery_code, PasswordChecks};

/// Location the analyze command stands in for
const ANALYZE_LOCATION: &str = "/home/analyze";

const RECOMMENDATIONS_LOCATION: &str = "/home/recommendations";

/// Tracks printed per recommendation list
const MAX_TRACKS_SHOWN: usize = 15;

fn prompt_line(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("Failed to read input")?;
    Ok(line.trim().to_string())
}

fn prompt_password(label: &str) -> Result<String> {
    rpassword::prompt_password(format!("{}: ", label)).context("Failed to read password")
}

/// Read a new password twice and check it against the password rules
fn prompt_new_password(label: &str) -> Result<String> {
    let password = prompt_password(label)?;
    let checks = PasswordChecks::evaluate(&password);
    if !checks.is_valid() {
        bail!("Password needs {}", checks.unmet().join(", "));
    }
    if prompt_password("Confirm password")? != password {
        bail!("Passwords do not match");
    }
    Ok(password)
}

/// Print and consume the pending flash message, if any
fn show_flash(session: &SessionManager) {
    if let Some(flash) = session.flash().take() {
        match flash.severity {
            Severity::Error => eprintln!("{}", flash.message),
            Severity::Success | Severity::Info => println!("{}", flash.message),
        }
    }
}

fn print_redirect(redirect: &mut SignInRedirect) {
    if let Some(flash) = redirect.take_flash() {
        eprintln!("{}", flash.message);
    }
    eprintln!("You need to sign in first: anima login");
    if let Some(location) = redirect.return_to() {
        eprintln!("(requested {})", location);
    }
}

/// Turn an API failure into something a person can act on
fn explain(err: anyhow::Error, unauthorized: &str) -> anyhow::Error {
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Unauthorized) => anyhow::anyhow!("{}", unauthorized),
        Some(api) => anyhow::anyhow!("{}", api.user_message()),
        None => err,
    }
}

pub async fn login(session: &SessionManager, config: &mut Config, email: Option<&str>) -> Result<()> {
    let email = match email.map(str::to_string).or_else(|| config.last_email.clone()) {
        Some(email) => {
            println!("Email: {}", email);
            email
        }
        None => prompt_line("Email")?,
    };
    if !is_valid_email(&email) {
        bail!("'{}' is not a valid email address", email);
    }
    let password = prompt_password("Password")?;

    let user = session
        .sign_in(&email, &password)
        .await
        .map_err(|e| explain(e, "Incorrect email or password"))?;

    config.last_email = Some(user.email.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    show_flash(session);
    Ok(())
}

pub async fn register(session: &SessionManager, config: &mut Config) -> Result<()> {
    let name = prompt_line("Name")?;
    if name.is_empty() {
        bail!("Name is required");
    }
    let email = prompt_line("Email")?;
    if !is_valid_email(&email) {
        bail!("'{}' is not a valid email address", email);
    }

    let password = prompt_new_password("Password")?;

    let user = session
        .sign_up(&name, &email, &password)
        .await
        .map_err(|e| explain(e, "Account created, but signing in failed"))?;

    println!("Account created for {}.", user.email);
    config.last_email = Some(user.email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    show_flash(session);
    Ok(())
}

/// Reset a forgotten password with an emailed code
pub async fn recover(session: &SessionManager, config: &Config, email: Option<&str>) -> Result<()> {
    let email = match email.map(str::to_string).or_else(|| config.last_email.clone()) {
        Some(email) => {
            println!("Email: {}", email);
            email
        }
        None => prompt_line("Email")?,
    };
    if !is_valid_email(&email) {
        bail!("'{}' is not a valid email address", email);
    }
    let client = session.client();

    client
        .request_password_recovery(&email)
        .await
        .map_err(|e| explain(e.into(), "Password recovery was rejected"))?;
    println!("A recovery code was sent to {}.", email);

    let code = prompt_line("Code")?;
    if !is_valid_recovery_code(&code) {
        bail!("The code has 6 digits");
    }
    client
        .verify_recovery_code(&email, &code)
        .await
        .map_err(|e| explain(e.into(), "Invalid or expired code"))?;

    let password = prompt_new_password("New password")?;
    let reset = client
        .reset_password(&email, &code, &password)
        .await
        .map_err(|e| explain(e.into(), "Invalid or expired code"))?;

    println!("{}", reset.message);
    println!("Sign in with: anima login {}", email);
    Ok(())
}

pub fn logout(session: &SessionManager) -> Result<()> {
    session.logout().context("Failed to clear the stored session")?;
    println!("Signed out.");
    Ok(())
}

pub fn status(session: &SessionManager) -> Result<()> {
    match session.state() {
        SessionState::Anonymous => println!("Not signed in."),
        SessionState::Active { expires_at } => {
            let minutes = (expires_at - Utc::now()).num_minutes().max(0);
            println!(
                "Signed in. Session expires at {} ({} min left).",
                expires_at.with_timezone(&Local).format("%H:%M"),
                minutes
            );
        }
        SessionState::Expired => println!("Session expired. Run `anima login` to sign in again."),
    }
    Ok(())
}

pub async fn whoami(session: &SessionManager) -> Result<()> {
    if !session.guard().can_enter() {
        println!("Not signed in.");
        return Ok(());
    }
    let user = session
        .current_user()
        .await
        .map_err(|e| explain(e.into(), "Your session has expired. Please sign in again."))?;
    println!("{} <{}>", user.name, user.email);
    Ok(())
}

fn mime_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => bail!("Unsupported image type '{}' (use jpg, png, webp or gif)", ext),
    })
}

/// Analyze a photo, then suggest music for the detected emotion.
///
/// The file is uploaded as multipart unless `inline` asks for the base64
/// JSON endpoint.
pub async fn analyze(session: &SessionManager, path: &str, inline: bool) -> Result<()> {
    let view = match session.guard().enter(ANALYZE_LOCATION) {
        Admission::Granted(view) => view,
        Admission::Redirect(mut redirect) => {
            print_redirect(&mut redirect);
            return Ok(());
        }
    };

    let path = Path::new(path);
    let mime = mime_for(path)?;
    let image = std::fs::read(path)
        .with_context(|| format!("Failed to read image {}", path.display()))?;

    let client = session.client();
    let result = if inline {
        client.analyze_image(&image, mime).await
    } else {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image");
        client.analyze_image_file(image, file_name, mime).await
    };
    let analysis = result
        .map_err(|e| explain(e.into(), "Your session has expired. Please sign in again."))?;

    println!(
        "Emotion: {} ({:.0}% confidence)",
        analysis.emotion,
        analysis.confidence * 100.0
    );
    for (emotion, score) in analysis.ranked() {
        println!("  {:<10} {:>5.1}%", emotion, score * 100.0);
    }
    if !analysis.message.is_empty() {
        println!("{}", analysis.message);
    }

    // Missing music should not fail an analysis that worked
    match client.recommendations(&analysis.emotion).await {
        Ok(recs) => {
            println!();
            print_tracks(&recs);
        }
        Err(e) => {
            warn!(error = %e, emotion = %analysis.emotion, "Recommendations unavailable");
            eprintln!("No music suggestions right now: {}", e.user_message());
        }
    }
    view.unmount();
    Ok(())
}

/// Music for a chosen emotion
pub async fn recommend(session: &SessionManager, emotion: &str) -> Result<()> {
    let emotion = emotion.trim().to_lowercase();
    if !RECOMMENDATION_EMOTIONS.contains(&emotion.as_str()) {
        bail!(
            "Unknown emotion '{}' (choose one of: {})",
            emotion,
            RECOMMENDATION_EMOTIONS.join(", ")
        );
    }

    let view = match session.guard().enter(RECOMMENDATIONS_LOCATION) {
        Admission::Granted(view) => view,
        Admission::Redirect(mut redirect) => {
            print_redirect(&mut redirect);
            return Ok(());
        }
    };

    let recs = session
        .client()
        .recommendations(&emotion)
        .await
        .map_err(|e| explain(e.into(), "Recommendations are not available"))?;
    print_tracks(&recs);
    view.unmount();
    Ok(())
}

fn print_tracks(recs: &Recommendations) {
    if recs.tracks.is_empty() {
        println!("No tracks found for {}.", recs.emotion);
        return;
    }
    let source = if recs.mockup_mode { " (sample catalogue)" } else { "" };
    println!("Music for {}{}:", recs.emotion, source);
    for (i, track) in recs.tracks.iter().take(MAX_TRACKS_SHOWN).enumerate() {
        let duration = track.duration().map(|d| format!(" [{}]", d)).unwrap_or_default();
        println!("{:>3}. {} - {}{}", i + 1, track.name, track.artist_names(), duration);
        if let Some(url) = track.spotify_url() {
            println!("     {}", url);
        }
    }
}

pub async fn watch(session: &SessionManager, location: Option<&str>) -> Result<()> {
    let location = location.unwrap_or(DEFAULT_HOME_PATH);
    let mut view = match session.guard().enter(location) {
        Admission::Granted(view) => view,
        Admission::Redirect(mut redirect) => {
            print_redirect(&mut redirect);
            return Ok(());
        }
    };

    let expired = Arc::new(tokio::sync::Notify::new());
    let notify = Arc::clone(&expired);
    let _subscription = session.bus().subscribe(move |_| notify.notify_one());

    println!("Watching session on {} (Ctrl-C to stop)...", view.location());

    tokio::select! {
        biased;
        _ = expired.notified() => {
            show_flash(session);
            if let Some(redirect) = session.take_expiry_redirect() {
                println!("Sign in again to return to {}.", redirect.resume_location());
            }
        }
        _ = view.ended() => {
            println!("Session ended (signed out elsewhere).");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            println!("Stopped watching.");
        }
    }

    view.unmount();
    Ok(())
}
