use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page as CdpPage;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The capability set the orchestration core consumes from a browser page.
/// All element references are CSS selectors; the DOM scan stamps stable
/// `data-aaid` attributes so selectors survive re-renders.
#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    /// Run the injected DOM scan and return its JSON payload.
    async fn scan(&self) -> Result<serde_json::Value>;
    async fn read_value(&self, selector: &str) -> Result<String>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;
    /// Set a control's value directly and fire input/change events.
    async fn set_value(&self, selector: &str, value: &str) -> Result<()>;
    /// Pick the `<select>` option whose text matches `label`.
    async fn select_option(&self, selector: &str, label: &str) -> Result<()>;
    async fn set_checked(&self, selector: &str) -> Result<()>;
    async fn click(&self, selector: &str) -> Result<()>;
    /// Script-dispatched click, for elements that swallow real clicks.
    async fn click_js(&self, selector: &str) -> Result<()>;
    /// Scroll into view and synthesize a mouse event. Last resort.
    async fn click_forced(&self, selector: &str) -> Result<()>;
    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<bool>;
    async fn screenshot_png(&self) -> Result<Vec<u8>>;
}

/// Escalating click: standard -> script dispatch -> forced. Each strategy is
/// bounded; exhausting all three reports failure upward instead of looping.
pub async fn click_with_escalation(page: &dyn Page, selector: &str) -> Result<()> {
    match page.click(selector).await {
        Ok(()) => return Ok(()),
        Err(e) => debug!(selector, error = %e, "standard click failed, escalating"),
    }
    match page.click_js(selector).await {
        Ok(()) => return Ok(()),
        Err(e) => debug!(selector, error = %e, "script click failed, escalating"),
    }
    page.click_forced(selector)
        .await
        .map_err(|e| anyhow!("all click strategies exhausted for {selector}: {e}"))
}

/// Persistent browser session. Created once, reused for the whole run.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attach to a debugging Chrome on port 9222 if one is running,
    /// otherwise launch our own with a dedicated profile directory.
    pub fn launch(headless: bool) -> Result<Self> {
        if let Ok(browser) = Browser::connect("http://127.0.0.1:9222".to_string()) {
            info!("attached to existing Chrome on port 9222");
            let tab = {
                let tabs_lock = browser.get_tabs();
                let tabs = tabs_lock.lock().unwrap();
                match tabs.first() {
                    Some(t) => t.clone(),
                    None => browser.new_tab()?,
                }
            };
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        debug!("no debugging Chrome found, launching a dedicated instance");

        let user_data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autoapply")
            .join("chrome-profile");
        std::fs::create_dir_all(&user_data_dir)?;

        let options = LaunchOptions {
            headless,
            path: find_chrome(),
            user_data_dir: Some(user_data_dir),
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
                std::ffi::OsStr::new("--disable-infobars"),
                std::ffi::OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        let browser = Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

/// Look for a Chrome/Chromium binary; None lets headless_chrome auto-detect.
fn find_chrome() -> Option<PathBuf> {
    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];
    for path in &candidates {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }
    warn!("no Chrome binary found at known paths, relying on auto-detection");
    None
}

/// `Page` over a live CDP tab. Every call hops to a blocking task because
/// headless_chrome's transport is synchronous.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    async fn eval_string(&self, js: String) -> Result<String> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || -> Result<String> {
            let result = tab.evaluate(&js, false)?;
            Ok(result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default())
        })
        .await?
    }

    async fn eval_unit(&self, js: String) -> Result<()> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.evaluate(&js, false)?;
            Ok(())
        })
        .await?
    }
}

/// Quote a string as a JS literal (selector or value interpolation).
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl Page for ChromePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let tab = self.tab.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.navigate_to(&url)?;
            tab.wait_for_element("body")?;
            // let client-side rendering settle
            std::thread::sleep(Duration::from_millis(1500));
            Ok(())
        })
        .await?
    }

    async fn current_url(&self) -> Result<String> {
        self.eval_string("window.location.href".to_string()).await
    }

    async fn title(&self) -> Result<String> {
        self.eval_string("document.title".to_string()).await
    }

    async fn scan(&self) -> Result<serde_json::Value> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
            let result = tab.evaluate(crate::dom::SCAN_JS, false)?;
            let raw = result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .ok_or_else(|| anyhow!("DOM scan returned no payload"))?;
            Ok(serde_json::from_str(&raw)?)
        })
        .await?
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        let js = format!(
            "(document.querySelector({sel}) || {{}}).value || ''",
            sel = js_str(selector)
        );
        self.eval_string(js).await
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let el = tab.find_element(&selector)?;
            el.click()?;
            tab.evaluate(
                &format!(
                    "document.querySelector({sel}).value = ''",
                    sel = js_str(&selector)
                ),
                false,
            )?;
            tab.type_str(&text)?;
            Ok(())
        })
        .await?
    }

    async fn set_value(&self, selector: &str, value: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return 'missing';
  el.value = {val};
  el.dispatchEvent(new Event('input', {{bubbles: true}}));
  el.dispatchEvent(new Event('change', {{bubbles: true}}));
  return 'ok';
}})()"#,
            sel = js_str(selector),
            val = js_str(value)
        );
        let out = self.eval_string(js).await?;
        if out == "ok" {
            Ok(())
        } else {
            Err(anyhow!("set_value: no element for {selector}"))
        }
    }

    async fn select_option(&self, selector: &str, label: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return 'missing';
  const want = {val}.toLowerCase();
  const opt = [...el.options].find(o => o.text.trim().toLowerCase() === want)
    || [...el.options].find(o => o.text.trim().toLowerCase().includes(want));
  if (!opt) return 'no-option';
  el.value = opt.value;
  el.dispatchEvent(new Event('input', {{bubbles: true}}));
  el.dispatchEvent(new Event('change', {{bubbles: true}}));
  return 'ok';
}})()"#,
            sel = js_str(selector),
            val = js_str(label)
        );
        let out = self.eval_string(js).await?;
        if out == "ok" {
            Ok(())
        } else {
            Err(anyhow!("select_option: {out} for {selector}"))
        }
    }

    async fn set_checked(&self, selector: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return 'missing';
  el.checked = true;
  el.dispatchEvent(new Event('change', {{bubbles: true}}));
  return 'ok';
}})()"#,
            sel = js_str(selector)
        );
        let out = self.eval_string(js).await?;
        if out == "ok" {
            Ok(())
        } else {
            Err(anyhow!("set_checked: no element for {selector}"))
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let el = tab.find_element(&selector)?;
            el.click()?;
            std::thread::sleep(Duration::from_millis(800));
            Ok(())
        })
        .await?
    }

    async fn click_js(&self, selector: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return 'missing';
  el.click();
  return 'ok';
}})()"#,
            sel = js_str(selector)
        );
        let out = self.eval_string(js).await?;
        if out == "ok" {
            Ok(())
        } else {
            Err(anyhow!("click_js: no element for {selector}"))
        }
    }

    async fn click_forced(&self, selector: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return 'missing';
  el.scrollIntoView({{block: 'center'}});
  el.dispatchEvent(new MouseEvent('click', {{bubbles: true, cancelable: true, view: window}}));
  return 'ok';
}})()"#,
            sel = js_str(selector)
        );
        let out = self.eval_string(js).await?;
        if out == "ok" {
            Ok(())
        } else {
            Err(anyhow!("click_forced: no element for {selector}"))
        }
    }

    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<bool> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            Ok(tab
                .wait_for_element_with_custom_timeout(
                    &selector,
                    Duration::from_millis(timeout_ms),
                )
                .is_ok())
        })
        .await?
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            Ok(tab.capture_screenshot(
                CdpPage::CaptureScreenshotFormatOption::Png,
                None,
                None,
                true,
            )?)
        })
        .await?
    }
}
