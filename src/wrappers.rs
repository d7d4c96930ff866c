//! Framework harness wrappers.
//!
//! Each wrapper turns a snippet into a self-contained script that finds the
//! preview container, mounts the snippet into it, and routes anything thrown
//! during mount to `__comarkup.fail`, which replaces the container contents
//! with an error display. Module syntax (`import`, `export`) is stripped
//! because the framework runtimes are plain globals.

use std::sync::OnceLock;

use regex::Regex;

use crate::executor::{RenderError, RenderStage};
use crate::framework::FrameworkId;
use crate::jsx;

/// Selector of the element snippets are mounted into
pub const CONTAINER_SELECTOR: &str = ".preview-content";

const REACT_PRELUDE: &str = "var __react = typeof React !== 'undefined' ? React : {}; \
var useState = __react.useState, useEffect = __react.useEffect, useRef = __react.useRef, \
useMemo = __react.useMemo, useCallback = __react.useCallback, useContext = __react.useContext, \
useReducer = __react.useReducer, createContext = __react.createContext, Fragment = __react.Fragment;";

const VUE_PRELUDE: &str = "var __vue = typeof Vue !== 'undefined' ? Vue : {}; \
var createApp = __vue.createApp, defineComponent = __vue.defineComponent, ref = __vue.ref, \
reactive = __vue.reactive, computed = __vue.computed, watch = __vue.watch, \
onMounted = __vue.onMounted, h = __vue.h;";

const ANGULAR_PRELUDE: &str = "if (typeof ng !== 'undefined') { \
window.Component = ng.core.Component; window.NgModule = ng.core.NgModule; \
window.BrowserModule = ng.platformBrowser.BrowserModule; \
window.platformBrowserDynamic = ng.platformBrowserDynamic.platformBrowserDynamic; }";

static IMPORT_LINE: OnceLock<Regex> = OnceLock::new();
static EXPORT_PREFIX: OnceLock<Regex> = OnceLock::new();
static DECLARED_COMPONENT: OnceLock<Regex> = OnceLock::new();
static ANGULAR_COMPONENT: OnceLock<Regex> = OnceLock::new();
static ANGULAR_SELECTOR: OnceLock<Regex> = OnceLock::new();
static SELF_MOUNTING_VUE: OnceLock<Regex> = OnceLock::new();

fn import_line() -> &'static Regex {
    IMPORT_LINE.get_or_init(|| Regex::new(r"(?m)^[ \t]*import\s[^\n]*$").expect("IMPORT_LINE should be valid"))
}

fn export_prefix() -> &'static Regex {
    EXPORT_PREFIX
        .get_or_init(|| Regex::new(r"(?m)^([ \t]*)export\s+(?:default\s+)?").expect("EXPORT_PREFIX should be valid"))
}

/// `function Name`, `class Name` or `const Name =` at the start of a snippet
fn declared_component() -> &'static Regex {
    DECLARED_COMPONENT.get_or_init(|| {
        Regex::new(r"^(?:function|class)\s+([A-Za-z_$][\w$]*)|^(?:const|let|var)\s+([A-Z][\w$]*)\s*=")
            .expect("DECLARED_COMPONENT should be valid")
    })
}

fn angular_component() -> &'static Regex {
    ANGULAR_COMPONENT.get_or_init(|| {
        Regex::new(r"@Component\s*\(\s*\{([\s\S]*?)\}\s*\)\s*(?:export\s+)?class\s+(\w+)([\s\S]*)")
            .expect("ANGULAR_COMPONENT should be valid")
    })
}

fn angular_selector_pattern() -> &'static Regex {
    ANGULAR_SELECTOR.get_or_init(|| {
        Regex::new(r#"selector:\s*['"]([^'"]+)['"]"#).expect("ANGULAR_SELECTOR should be valid")
    })
}

fn self_mounting_vue() -> &'static Regex {
    SELF_MOUNTING_VUE.get_or_init(|| {
        Regex::new(r"\b(?:createApp|defineComponent)\s*\(").expect("SELF_MOUNTING_VUE should be valid")
    })
}

/// Remove `import` lines and `export` keywords so the snippet runs as a script
pub fn strip_module_syntax(code: &str) -> String {
    let without_imports = import_line().replace_all(code, "");
    export_prefix().replace_all(&without_imports, "$1").into_owned()
}

/// Element selector declared by an Angular component, if any
pub fn angular_selector(code: &str) -> Option<String> {
    angular_selector_pattern()
        .captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Build the mount script for `code`.
pub fn wrap(code: &str, framework: FrameworkId) -> Result<String, RenderError> {
    match framework {
        FrameworkId::React => react(code),
        FrameworkId::Angular => angular(code),
        FrameworkId::Vue => Ok(vue(code)),
        FrameworkId::Vanilla => Ok(vanilla(code)),
    }
}

fn guarded(prelude: &str, body: &str) -> String {
    format!(
        "(function () {{\n  var container = document.querySelector('{sel}');\n  {prelude}\n  try {{\n{body}\n  }} catch (error) {{\n    __comarkup.fail(error);\n  }}\n}})();\n",
        sel = CONTAINER_SELECTOR,
        prelude = prelude,
        body = body,
    )
}

fn react(code: &str) -> Result<String, RenderError> {
    let source = strip_module_syntax(code);
    let source = source.trim();
    let transformed = jsx::transpile(source)
        .map_err(|e| RenderError::new(RenderStage::Transpile, format!("JSX syntax error: {}", e)))?;

    let mounts_itself = source.contains("ReactDOM.render(") || source.contains("createRoot(");
    let body = if mounts_itself {
        transformed
    } else if let Some(name) = component_name(source) {
        format!("{}\nReactDOM.render(React.createElement({}), container);", transformed, name)
    } else {
        format!(
            "var App = function () {{\n  return ({});\n}};\nReactDOM.render(React.createElement(App), container);",
            transformed.trim().trim_end_matches(';')
        )
    };
    Ok(guarded(REACT_PRELUDE, &body))
}

fn component_name(source: &str) -> Option<String> {
    declared_component()
        .captures(source)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
}

fn angular(code: &str) -> Result<String, RenderError> {
    let caps = angular_component()
        .captures(code)
        .ok_or_else(|| RenderError::new(RenderStage::Transpile, "Invalid Angular component format"))?;
    let metadata = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let name = caps.get(2).map(|m| m.as_str()).unwrap_or("AppComponent");
    let rest = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    // Drop `implements ...` and anything else before the class body.
    let class_body = rest.find('{').map(|i| &rest[i..]).unwrap_or("{}");

    let prefill = angular_selector(code)
        .map(|sel| {
            let tag = serde_json::Value::String(format!("<{0}></{0}>", sel)).to_string();
            format!("container.innerHTML = {};\n", tag)
        })
        .unwrap_or_default();

    let body = format!(
        "{prefill}var {name} = Component({{{metadata}}})(class {name} {class_body});\n\
var AppModule = NgModule({{ imports: [BrowserModule], declarations: [{name}], bootstrap: [{name}] }})(class {{}});\n\
platformBrowserDynamic().bootstrapModule(AppModule).catch(function (err) {{ __comarkup.fail(err); }});",
        prefill = prefill,
        name = name,
        metadata = metadata,
        class_body = class_body,
    );
    let body = jsx::strip_types(&body)
        .map_err(|e| RenderError::new(RenderStage::Transpile, format!("TypeScript syntax error: {}", e)))?;
    Ok(guarded(ANGULAR_PRELUDE, &body))
}

fn vue(code: &str) -> String {
    let source = strip_module_syntax(code);
    if self_mounting_vue().is_match(&source) {
        return guarded(VUE_PRELUDE, &source);
    }

    let template = serde_json::Value::String(source.trim().to_string()).to_string();
    let body = format!(
        "var host = document.createElement('div');\n\
host.innerHTML = {template};\n\
container.appendChild(host);\n\
var app = createApp({{ data: function () {{ return {{ error: null }}; }}, errorCaptured: function (err) {{ __comarkup.fail(err); return false; }} }});\n\
app.mount(host);",
        template = template,
    );
    guarded(VUE_PRELUDE, &body)
}

fn vanilla(code: &str) -> String {
    guarded("", &strip_module_syntax(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanilla_is_guarded_and_exposes_container() {
        let out = wrap("container.textContent = 'hi';", FrameworkId::Vanilla).unwrap();
        assert!(out.contains("var container = document.querySelector('.preview-content');"));
        assert!(out.contains("container.textContent = 'hi';"));
        assert!(out.contains("__comarkup.fail(error)"));
    }

    #[test]
    fn react_component_declaration_is_mounted_by_name() {
        let code = "import React from 'react';\nexport default function Counter() { return <b>1</b>; }";
        let out = wrap(code, FrameworkId::React).unwrap();
        assert!(!out.contains("import"));
        assert!(!out.contains("export"));
        assert!(out.contains(r#"return React.createElement("b", null, "1");"#));
        assert!(out.contains("ReactDOM.render(React.createElement(Counter), container);"));
    }

    #[test]
    fn react_arrow_component_and_bare_expression() {
        let out = wrap("const Hello = () => <p>hi</p>;", FrameworkId::React).unwrap();
        assert!(out.contains("React.createElement(Hello)"));

        let out = wrap("<h1>Title</h1>", FrameworkId::React).unwrap();
        assert!(out.contains(r#"return (React.createElement("h1", null, "Title"));"#));
        assert!(out.contains("React.createElement(App)"));
    }

    #[test]
    fn react_syntax_error_is_a_transpile_failure() {
        let err = wrap("<div><span></div>", FrameworkId::React).unwrap_err();
        assert_eq!(err.stage, RenderStage::Transpile);
        assert!(err.message.starts_with("JSX syntax error"));
    }

    #[test]
    fn angular_prefills_selector_and_bootstraps() {
        let code = "@Component({\n  selector: 'app-hello',\n  template: '<h1>Hi</h1>'\n})\nexport class HelloComponent implements OnInit {\n  ngOnInit() {}\n}";
        let out = wrap(code, FrameworkId::Angular).unwrap();
        assert!(out.contains("container.innerHTML = \"<app-hello></app-hello>\""), "{}", out);
        assert!(out.contains("var HelloComponent = Component("), "{}", out);
        assert!(out.contains("class HelloComponent"), "{}", out);
        assert!(out.contains("ngOnInit()"), "{}", out);
        assert!(!out.contains("implements"), "{}", out);
        assert!(out.contains("bootstrapModule(AppModule)"), "{}", out);
    }

    #[test]
    fn angular_typescript_is_erased() {
        let code = "@Component({ selector: 'app-count', template: '<p>{{ count }}</p>' })\nexport class CountComponent {\n  count: number = 0;\n  constructor(private title: string) {}\n}";
        let out = wrap(code, FrameworkId::Angular).unwrap();
        assert!(!out.contains(": number"), "{}", out);
        assert!(!out.contains("private"), "{}", out);
        assert!(out.contains("this.title = title"), "{}", out);
    }

    #[test]
    fn angular_without_decorator_is_rejected() {
        let err = wrap("export class Foo {}", FrameworkId::Angular).unwrap_err();
        assert_eq!(err.message, "Invalid Angular component format");
    }

    #[test]
    fn vue_template_vs_script() {
        let out = wrap("<div v-if=\"true\">{{ 1 + 1 }}</div>", FrameworkId::Vue).unwrap();
        assert!(out.contains(r#"host.innerHTML = "<div v-if=\"true\">{{ 1 + 1 }}</div>";"#));
        assert!(out.contains("app.mount(host);"));

        let script = "import { createApp } from 'vue';\ncreateApp({ template: '<p>x</p>' }).mount('#app');";
        let out = wrap(script, FrameworkId::Vue).unwrap();
        assert!(!out.contains("host.innerHTML"));
        assert!(out.contains("createApp({ template: '<p>x</p>' }).mount('#app');"));
    }
}
