use tauri::Webview;
use url::Url;

use crate::append_desktop_log;

const TAURI_INVOKE_HELPER: &str = r#"
  const invoke = (command, payload) => {
    const internals = window.__TAURI_INTERNALS__;
    if (!internals || typeof internals.invoke !== 'function') {
      return Promise.resolve({ ok: false, reason: 'Desktop bridge is unavailable.' });
    }
    return internals.invoke(command, payload || {});
  };
"#;

const CONTEXT_MENU_GUARD: &str = r#"
  window.addEventListener('contextmenu', (event) => event.preventDefault(), true);
"#;

/// Exposes the terminal operations to backend pages.
pub(crate) fn desktop_bridge_script() -> String {
    format!(
        r#"(() => {{
  if (window.nexifyDesktop) {{
    return;
  }}
{TAURI_INVOKE_HELPER}
  const bridge = Object.freeze({{
    isDesktop: true,
    openTerminal: (args) => invoke('open_terminal', {{ args: args === undefined ? null : args }}),
    closeTerminal: () => invoke('close_terminal'),
  }});
  Object.defineProperty(window, 'nexifyDesktop', {{ value: bridge, configurable: false }});
  if (!window.electronAPI) {{
    window.electronAPI = bridge;
  }}
}})();"#
    )
}

/// Runs before any page script: `window.open` goes to the system browser, and
/// packaged builds get no context menu.
pub(crate) fn window_guard_script(suppress_context_menu: bool) -> String {
    let context_menu_guard = if suppress_context_menu {
        CONTEXT_MENU_GUARD
    } else {
        ""
    };
    format!(
        r#"(() => {{
  if (window.__nexifyWindowGuard) {{
    return;
  }}
  window.__nexifyWindowGuard = true;
{TAURI_INVOKE_HELPER}
  window.open = (target) => {{
    if (target) {{
      const resolved = new URL(String(target), window.location.href).toString();
      invoke('open_external_url', {{ url: resolved }});
    }}
    return null;
  }};
{context_menu_guard}}})();"#
    )
}

pub(crate) fn should_inject_desktop_bridge(backend_url: &str, page_url: &Url) -> bool {
    let Ok(backend_url) = Url::parse(backend_url) else {
        return false;
    };
    page_url.origin() == backend_url.origin()
}

pub(crate) fn inject_desktop_bridge(webview: &Webview) {
    if let Err(error) = webview.eval(&desktop_bridge_script()) {
        append_desktop_log(&format!("failed to inject desktop bridge: {error}"));
    }
}
