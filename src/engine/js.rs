//! Page-side scripts evaluated in every tab

/// Binding the page calls to report a discovered URL: `addLink(url, sourceTag)`
pub const ADD_LINK_BINDING: &str = "addLink";
/// Binding installed for manual probing; calls are acknowledged and ignored
pub const TEST_BINDING: &str = "Test";

/// Installed before any page script runs.
///
/// Wraps each CDP binding so the page gets a promise back, then hooks the
/// APIs through which a page can navigate or open connections without
/// touching the DOM. Each hook reports through `addLink` with its source tag.
pub const TAB_INIT_JS: &str = r#"(function () {
    const wrap = function (name) {
        const binding = window[name];
        if (typeof binding !== 'function' || binding.__wrapped) {
            return;
        }
        const wrapped = function (...args) {
            const self = window[name];
            const seq = (self.lastSeq || 0) + 1;
            self.lastSeq = seq;
            const promise = new Promise(function (resolve, reject) {
                self.callbacks.set(seq, { resolve: resolve, reject: reject });
            });
            binding(JSON.stringify({ name: name, seq: seq, args: args.map(String) }));
            return promise;
        };
        wrapped.callbacks = new Map();
        wrapped.__wrapped = true;
        window[name] = wrapped;
    };
    wrap('addLink');
    wrap('Test');

    const report = function (url, source) {
        if (!url) {
            return;
        }
        try {
            window.addLink(String(url), source);
        } catch (e) {}
    };
    const toHttp = function (url) {
        return String(url).replace(/^ws(s?):/i, 'http$1:');
    };

    window.open = function (url) {
        report(url, 'OpenWindow');
        return null;
    };
    window.close = function () {};

    const pushState = window.history.pushState;
    const replaceState = window.history.replaceState;
    window.history.pushState = function (state, title, url) {
        report(url, 'HistoryAPI');
        return pushState.apply(this, arguments);
    };
    window.history.replaceState = function (state, title, url) {
        report(url, 'HistoryAPI');
        return replaceState.apply(this, arguments);
    };
    window.addEventListener('hashchange', function () {
        report(document.location.href, 'HashChange');
    });

    const NativeWebSocket = window.WebSocket;
    if (NativeWebSocket) {
        window.WebSocket = function (url, protocols) {
            report(toHttp(url), 'WebSocket');
            return protocols === undefined ? new NativeWebSocket(url) : new NativeWebSocket(url, protocols);
        };
        window.WebSocket.prototype = NativeWebSocket.prototype;
    }
    const NativeEventSource = window.EventSource;
    if (NativeEventSource) {
        window.EventSource = function (url, config) {
            report(url, 'EventSource');
            return new NativeEventSource(url, config);
        };
        window.EventSource.prototype = NativeEventSource.prototype;
    }
    const nativeFetch = window.fetch;
    if (nativeFetch) {
        window.fetch = function (input, init) {
            report(typeof input === 'string' ? input : (input && input.url), 'Fetch');
            return nativeFetch.apply(this, arguments);
        };
    }
})();"#;

/// Fills every editable field. Called with `{values, keywords}`.
const FILL_FORM_JS: &str = r#"async function (cfg) {
    const hintRules = [
        ['mail', /mail/],
        ['phone', /phone|mobile|tel/],
        ['password', /pass|pwd/],
        ['username', /user|login|account|nick/],
        ['code', /code|captcha|verify/],
        ['qq', /qq/],
        ['id_card', /id_?card|identity/],
        ['url', /url|site|link|homepage/],
        ['date', /date|birth|day/],
        ['number', /num|age|count|amount|price/],
    ];
    const pick = function (el) {
        const hint = [el.name, el.id, el.placeholder].join(' ').toLowerCase();
        for (const [keyword, value] of Object.entries(cfg.keywords)) {
            if (keyword && hint.includes(keyword.toLowerCase())) {
                return value;
            }
        }
        switch ((el.type || 'text').toLowerCase()) {
            case 'email': return cfg.values.mail;
            case 'password': return cfg.values.password;
            case 'tel': return cfg.values.phone;
            case 'url': return cfg.values.url;
            case 'date': return cfg.values.date;
            case 'number':
            case 'range': return cfg.values.number;
        }
        for (const [key, pattern] of hintRules) {
            if (pattern.test(hint)) {
                return cfg.values[key];
            }
        }
        return cfg.values.default;
    };
    const skipped = ['hidden', 'submit', 'button', 'image', 'reset', 'file'];
    let filled = 0;
    document.querySelectorAll('input, textarea').forEach(function (el) {
        const type = (el.type || '').toLowerCase();
        if (skipped.includes(type) || el.disabled || el.readOnly) {
            return;
        }
        if (type === 'checkbox' || type === 'radio') {
            el.checked = true;
        } else if (!el.value) {
            el.value = pick(el);
        }
        el.dispatchEvent(new Event('input', { bubbles: true }));
        el.dispatchEvent(new Event('change', { bubbles: true }));
        filled++;
    });
    document.querySelectorAll('select').forEach(function (el) {
        if (el.options.length > 0 && el.selectedIndex < 0) {
            el.selectedIndex = 0;
        }
    });
    return filled;
}"#;

/// Dispatches inline `on*` handlers one element at a time
const TRIGGER_EVENTS_JS: &str = r#"async function (interval) {
    const sleep = function (ms) {
        return new Promise(function (resolve) { setTimeout(resolve, ms); });
    };
    const handlers = [
        'onclick', 'ondblclick', 'onmousedown', 'onmouseup', 'onmouseover',
        'onmouseenter', 'onmouseleave', 'onfocus', 'onblur', 'onchange',
        'oninput', 'onkeydown', 'onkeyup', 'onkeypress',
    ];
    let fired = 0;
    for (const handler of handlers) {
        const nodes = document.querySelectorAll('[' + handler + ']');
        for (const node of nodes) {
            try {
                node.dispatchEvent(new Event(handler.slice(2), { bubbles: true, cancelable: true }));
                fired++;
            } catch (e) {}
            await sleep(interval);
        }
    }
    for (const link of document.querySelectorAll('a[href^="javascript:" i]')) {
        try {
            link.dispatchEvent(new MouseEvent('click', { bubbles: true, cancelable: true }));
            fired++;
        } catch (e) {}
        await sleep(interval);
    }
    return fired;
}"#;

/// Returns `{dom: [url], comments: [text], forms: [{action, method, enctype, fields}]}`
pub const COLLECT_LINKS_JS: &str = r#"(function () {
    const sources = [
        ['a', 'href'], ['link', 'href'], ['area', 'href'],
        ['frame', 'src'], ['iframe', 'src'], ['embed', 'src'], ['script', 'src'], ['img', 'src'],
        ['object', 'data'], ['form', 'action'],
    ];
    const dom = [];
    for (const [tag, attr] of sources) {
        document.querySelectorAll(tag + '[' + attr + ']').forEach(function (el) {
            const value = el.getAttribute(attr);
            if (value) {
                dom.push(value);
            }
        });
    }
    const comments = [];
    const walker = document.createTreeWalker(document, NodeFilter.SHOW_COMMENT);
    while (walker.nextNode()) {
        comments.push(walker.currentNode.nodeValue || '');
    }
    const excluded = ['submit', 'button', 'reset', 'image', 'file'];
    const forms = Array.from(document.forms).map(function (form) {
        const fields = Array.from(form.elements)
            .filter(function (el) {
                const type = (el.type || '').toLowerCase();
                if (!el.name || el.disabled || excluded.includes(type)) {
                    return false;
                }
                return !((type === 'checkbox' || type === 'radio') && !el.checked);
            })
            .map(function (el) { return [el.name, String(el.value || '')]; });
        return {
            action: form.getAttribute('action') || '',
            method: (form.getAttribute('method') || 'GET').toUpperCase(),
            enctype: form.getAttribute('enctype') || '',
            fields: fields,
        };
    });
    return { dom: dom, comments: comments, forms: forms };
})()"#;

pub const HTML_JS: &str =
    "document.documentElement ? document.documentElement.outerHTML : ''";

/// `content` attribute of `<meta http-equiv=Content-Type>`, or ''
pub const META_CHARSET_JS: &str = r#"(function () {
    const meta = document.querySelector('meta[http-equiv=Content-Type]');
    return meta ? (meta.getAttribute('content') || '') : '';
})()"#;

/// Resolves the page-side promise of binding call `seq`
pub fn deliver_result_js(name: &str, seq: u64, result: &str) -> String {
    let name = serde_json::Value::from(name);
    let result = serde_json::Value::from(result);
    format!(
        "(function (name, seq, result) {{ \
            const callbacks = window[name] && window[name].callbacks; \
            if (!callbacks || !callbacks.has(seq)) {{ return false; }} \
            callbacks.get(seq).resolve(result); \
            callbacks.delete(seq); \
            return true; \
        }})({name}, {seq}, {result})"
    )
}

pub fn fill_form_js(config: &serde_json::Value) -> String {
    format!("({FILL_FORM_JS})({config})")
}

pub fn trigger_events_js(interval_ms: u64) -> String {
    format!("({TRIGGER_EVENTS_JS})({interval_ms})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_result_quotes_arguments() {
        let js = deliver_result_js("addLink", 7, "s");
        assert!(js.ends_with(r#"("addLink", 7, "s")"#));
        let hostile = deliver_result_js("a\"b", 1, "s");
        assert!(hostile.contains(r#""a\"b""#));
    }

    #[test]
    fn test_call_wrappers() {
        let config = serde_json::json!({"values": {"default": "x"}, "keywords": {}});
        let js = fill_form_js(&config);
        assert!(js.starts_with("(async function (cfg)"));
        assert!(js.contains(r#""values":{"default":"x"}"#));
        assert!(js.ends_with("})"));
        assert!(trigger_events_js(100).ends_with("})(100)"));
    }

    #[test]
    fn test_init_script_wraps_both_bindings() {
        assert!(TAB_INIT_JS.contains(&format!("wrap('{ADD_LINK_BINDING}')")));
        assert!(TAB_INIT_JS.contains(&format!("wrap('{TEST_BINDING}')")));
    }
}
