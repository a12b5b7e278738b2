use tauri::{AppHandle, Manager, WebviewUrl, WebviewWindow, WebviewWindowBuilder};
use url::Url;

use crate::{
    append_desktop_log, desktop_bridge, desktop_bridge_commands,
    soft_failure::{self, SoftFailure},
    startup_task::StartupView,
    BACKEND_URL, ERROR_PAGE, LOADING_PAGE, MAIN_WINDOW_LABEL, MAIN_WINDOW_TITLE,
};

const MAIN_WINDOW_WIDTH: f64 = 1200.0;
const MAIN_WINDOW_HEIGHT: f64 = 800.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NavigationDecision {
    Allow,
    OpenExternal,
    Block,
}

fn is_app_page(url: &Url) -> bool {
    match url.scheme() {
        "tauri" => true,
        "http" | "https" => url
            .host_str()
            .is_some_and(|host| host == "tauri.localhost"),
        "about" => url.path() == "blank",
        _ => false,
    }
}

/// App pages and the backend stay in the window, other web pages go to the system browser.
pub(crate) fn classify_navigation(url: &Url, backend_url: &Url) -> NavigationDecision {
    if is_app_page(url) || url.origin() == backend_url.origin() {
        return NavigationDecision::Allow;
    }
    match url.scheme() {
        "http" | "https" => NavigationDecision::OpenExternal,
        _ => NavigationDecision::Block,
    }
}

fn handle_navigation(url: &Url, backend_url: &Url) -> bool {
    match classify_navigation(url, backend_url) {
        NavigationDecision::Allow => true,
        NavigationDecision::OpenExternal => {
            append_desktop_log(&format!("opening external page in system browser: {url}"));
            if let Err(error) = desktop_bridge_commands::open_url_with_system_browser(url.as_str()) {
                append_desktop_log(&format!("failed to open external page: {error}"));
            }
            false
        }
        NavigationDecision::Block => {
            append_desktop_log(&format!("blocked navigation to {url}"));
            false
        }
    }
}

pub(crate) fn create_main_window(
    app_handle: &AppHandle,
    suppress_context_menu: bool,
) -> Result<WebviewWindow, String> {
    if let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) {
        return Ok(window);
    }

    let backend_url =
        Url::parse(BACKEND_URL).map_err(|error| format!("Invalid backend URL: {error}"))?;
    let window = WebviewWindowBuilder::new(
        app_handle,
        MAIN_WINDOW_LABEL,
        WebviewUrl::App(LOADING_PAGE.into()),
    )
    .title(MAIN_WINDOW_TITLE)
    .inner_size(MAIN_WINDOW_WIDTH, MAIN_WINDOW_HEIGHT)
    .visible(false)
    .initialization_script(&desktop_bridge::window_guard_script(suppress_context_menu))
    .on_navigation(move |url| handle_navigation(url, &backend_url))
    .build()
    .map_err(|error| format!("Failed to create main window: {error}"))?;

    window
        .show()
        .map_err(|error| format!("Failed to show main window: {error}"))?;
    Ok(window)
}

pub(crate) fn show_main_window<F>(app_handle: &AppHandle, log: F)
where
    F: Fn(&str),
{
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        log("show_main_window skipped: main window not found");
        return;
    };
    if let Err(error) = window.unminimize() {
        log(&format!("failed to unminimize main window: {error}"));
    }
    if let Err(error) = window.show() {
        log(&format!("failed to show main window: {error}"));
    }
    if let Err(error) = window.set_focus() {
        log(&format!("failed to focus main window: {error}"));
    }
}

fn error_page_script(reason: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(reason.as_bytes()).collect();
    format!("window.location.replace('{ERROR_PAGE}?reason={encoded}');")
}

/// Closes devtools if they were opened. Builds without devtools never report open.
#[cfg(any(debug_assertions, feature = "devtools"))]
pub(crate) fn close_devtools_if_open(window: &WebviewWindow) -> bool {
    if !window.is_devtools_open() {
        return false;
    }
    window.close_devtools();
    true
}

#[cfg(not(any(debug_assertions, feature = "devtools")))]
pub(crate) fn close_devtools_if_open(_window: &WebviewWindow) -> bool {
    false
}

pub(crate) struct MainWindowView {
    app_handle: AppHandle,
}

impl MainWindowView {
    pub(crate) fn new(app_handle: AppHandle) -> Self {
        Self { app_handle }
    }

    fn on_main_window<F>(&self, action: &'static str, task: F) -> Result<(), String>
    where
        F: FnOnce(WebviewWindow) -> Result<(), String> + Send + 'static,
    {
        let app_handle = self.app_handle.clone();
        self.app_handle
            .run_on_main_thread(move || {
                let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
                    append_desktop_log(&format!("{action} skipped: main window not found"));
                    return;
                };
                if let Err(detail) = task(window) {
                    soft_failure::report(SoftFailure::Window { action, detail });
                }
            })
            .map_err(|error| format!("Failed to schedule {action}: {error}"))
    }
}

impl StartupView for MainWindowView {
    fn show_error(&self, reason: &str) -> Result<(), String> {
        let script = error_page_script(reason);
        self.on_main_window("show error page", move |window| {
            window
                .eval(&script)
                .map_err(|error| format!("Failed to load error page: {error}"))
        })
    }

    fn navigate_to_backend(&self) -> Result<(), String> {
        let backend_url =
            Url::parse(BACKEND_URL).map_err(|error| format!("Invalid backend URL: {error}"))?;
        self.on_main_window("navigate to backend", move |mut window| {
            window
                .navigate(backend_url)
                .map_err(|error| format!("Failed to navigate to backend: {error}"))
        })
    }
}
