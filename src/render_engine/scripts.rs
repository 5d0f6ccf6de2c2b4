//! JavaScript evaluated inside rendered pages

/// Navigator evasions registered before any document script runs
pub const STEALTH_SCRIPT: &str = r"
(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en', 'ja'] });
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' },
            { name: 'Native Client', filename: 'internal-nacl-plugin' }
        ]
    });
    if (!window.chrome) { window.chrome = {}; }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {
            connect: () => ({
                onMessage: { addListener: () => {}, removeListener: () => {} },
                postMessage: () => {}
            })
        };
    }
    const query = window.navigator.permissions && window.navigator.permissions.query;
    if (query) {
        window.navigator.permissions.query = (p) =>
            p && p.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : query.call(window.navigator.permissions, p);
    }
})();
";

/// Returns `{ title, text }` for the current document.
///
/// Works on a detached clone so the live page is untouched. Tables are
/// rewritten to the same `[ROW] [CELL] a | [CELL] b` lines the fast path
/// produces.
pub const EXTRACT_SCRIPT: &str = r"
(() => {
    const root = document.body ? document.body.cloneNode(true) : null;
    if (!root) {
        return { title: document.title || null, text: '' };
    }
    root.querySelectorAll('script, style, noscript, template, svg, nav, footer, header, iframe')
        .forEach((el) => el.remove());

    root.querySelectorAll('table').forEach((table) => {
        const lines = [];
        table.querySelectorAll('tr').forEach((tr) => {
            const cells = Array.from(tr.querySelectorAll('th, td')).map(
                (cell) => '[CELL] ' + (cell.textContent || '').replace(/\s+/g, ' ').trim()
            );
            if (cells.length > 0) {
                lines.push('[ROW] ' + cells.join(' | '));
            }
        });
        const block = document.createElement('pre');
        block.textContent = '\n' + lines.join('\n') + '\n';
        table.replaceWith(block);
    });

    // innerText needs layout; a detached clone has none, so attach it hidden
    root.style.position = 'absolute';
    root.style.left = '-99999px';
    document.documentElement.appendChild(root);
    const text = root.innerText || root.textContent || '';
    root.remove();

    return { title: document.title || null, text };
})()
";
