use gptbridge_core::{Config, Paths};
use gptbridge_providers::factory::resolve_api_key;
use gptbridge_tools::browser::session::find_browser_binary;

/// Run full environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 gptbridge doctor — Environment Diagnostics");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    if paths.config_file().exists() {
        print_ok("Config file exists", &paths.config_file().display().to_string());
        ok_count += 1;
    } else {
        print_warn(
            "Config file not found",
            "Defaults will be used; create config.json to customize",
        );
        warn_count += 1;
    }

    let config = Config::load_or_default(&paths)?;
    println!("  Model: {}", config.agent.model);
    println!("  ChatGPT URL: {}", config.chatgpt.url);
    println!("  Allowed domains: {}", config.chatgpt.allowed_domains.join(", "));
    println!();

    // --- 2. Providers ---
    println!("🔑 Providers");
    let mut any_key = false;
    for name in ["anthropic", "openai"] {
        if resolve_api_key(&config, name).is_some() {
            print_ok(&format!("{} API key configured", name), "");
            ok_count += 1;
            any_key = true;
        }
    }
    if !any_key {
        print_err(
            "No API key configured",
            "Set providers.anthropic.apiKey in config.json or export ANTHROPIC_API_KEY",
        );
        err_count += 1;
    }
    println!();

    // --- 3. Browser ---
    println!("🖥️  Browser");
    match config.browser.binary.as_deref() {
        Some(binary) => {
            if std::path::Path::new(binary).exists() {
                print_ok("Configured browser binary exists", binary);
                ok_count += 1;
            } else {
                print_err("Configured browser binary not found", binary);
                err_count += 1;
            }
        }
        None => match find_browser_binary() {
            Some(found) => {
                print_ok("Chrome/Chromium discovered", &found);
                ok_count += 1;
            }
            None => {
                print_err(
                    "No Chrome/Chromium binary found",
                    "Install Chrome or set browser.binary in config.json",
                );
                err_count += 1;
            }
        },
    }
    println!("  Headless: {}", config.browser.headless);
    println!();

    // --- 4. Server ---
    println!("🌐 Server");
    println!("  Bind address: {}:{}", config.server.host, config.server.port);
    println!("  Run timeout: {}s", config.agent.run_timeout_secs);
    println!();

    // --- Summary ---
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "  ✅ {} passed  ⚠️  {} warnings  ❌ {} errors",
        ok_count, warn_count, err_count
    );

    if err_count > 0 {
        println!();
        println!("  {} error(s) must be fixed before normal use.", err_count);
    } else if warn_count > 0 {
        println!();
        println!("  Core features OK. Some optional features not ready.");
    } else {
        println!();
        println!("  🎉 All good!");
    }
    println!();

    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} — {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {} — {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {} — {}", label, hint);
    }
}
