//! End-to-end behaviour of the preview pipeline.

use livepreview_core::compiler::TransformOptions;
use livepreview_core::preview::{channel, render, HostMessage, SandboxMessage, SourceLocation};
use livepreview_core::registry::ModuleReference;
use livepreview_core::vfs::FsOperation;
use livepreview_core::{
    import_map, resolve, styles, ApplyOutcome, CompileError, FileSet, MemoryFileSystem,
    PackageRedirects, Pipeline, PreviewSession, Registry, ResolvedSpecifier, VirtualFileSystem,
};
use std::collections::BTreeMap;

fn session() -> PreviewSession {
    PreviewSession::new(Pipeline::default(), "it")
}

fn project() -> FileSet {
    FileSet::from_files([
        (
            "/App.jsx",
            "import Header from '@/components/Header';\nimport data from './data.json';\nexport default () => <main><Header/>{data.items.length}</main>;",
        ),
        (
            "/components/Header.tsx",
            "import { label } from '../lib/label';\nexport default function Header(): JSX.Element { return <h1>{label('x')}</h1>; }",
        ),
        ("/lib/label.ts", "export const label = (s: string): string => s.toUpperCase();"),
        ("/data.json", "{ \"items\": [1, 2, 3] }"),
        ("/styles.css", "h1 { color: teal; }"),
    ])
}

#[test]
fn exactly_one_reference_per_local_module() {
    let mut session = session();
    assert!(matches!(session.recompile(&project()), ApplyOutcome::Applied(_)));

    let registry = session.registry();
    let module_paths: Vec<&str> = registry.modules().map(|m| m.path.as_str()).collect();
    assert_eq!(
        module_paths,
        vec!["/App.jsx", "/components/Header.tsx", "/data.json", "/lib/label.ts"]
    );
    assert_eq!(registry.stats().live, 4);

    let map = session.import_map();
    for module in registry.modules() {
        assert_eq!(map.get(&module.path), Some(module.reference.as_str()));
    }
}

#[test]
fn recompiling_an_unchanged_snapshot_is_idempotent() {
    let files = project();

    let mut first = Registry::new("a");
    first
        .recompile_all(&files, &PackageRedirects::default(), &TransformOptions::default())
        .unwrap();
    let mut second = Registry::new("b");
    second
        .recompile_all(&files, &PackageRedirects::default(), &TransformOptions::default())
        .unwrap();

    let first_map = import_map::build(&first, &PackageRedirects::default());
    let second_map = import_map::build(&second, &PackageRedirects::default());
    let first_keys: Vec<&String> = first_map.imports.keys().collect();
    let second_keys: Vec<&String> = second_map.imports.keys().collect();
    assert_eq!(first_keys, second_keys);

    // References are opaque and differ, but what they dereference to is
    // identical once references are normalized back to paths.
    let normalize = |registry: &Registry, code: &str| {
        let mut code = code.to_string();
        for module in registry.modules() {
            code = code.replace(module.reference.as_str(), &module.path);
        }
        code
    };
    for module in first.modules() {
        let other = second.module(&module.path).unwrap();
        let a = first.dereference(module.reference.as_str()).unwrap();
        let b = second.dereference(other.reference.as_str()).unwrap();
        assert_eq!(normalize(&first, &a), normalize(&second, &b));
    }

    // Within one registry, a second pass keeps every reference.
    let before: BTreeMap<String, ModuleReference> = first
        .modules()
        .map(|m| (m.path.clone(), m.reference.clone()))
        .collect();
    first
        .recompile_all(&files, &PackageRedirects::default(), &TransformOptions::default())
        .unwrap();
    let after: BTreeMap<String, ModuleReference> = first
        .modules()
        .map(|m| (m.path.clone(), m.reference.clone()))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn extension_match_precedes_directory_index() {
    let files = FileSet::from_files([
        ("/Foo.jsx", "export default 'file';"),
        ("/Foo/index.jsx", "export default 'index';"),
        ("/App.jsx", "import Foo from './Foo';\nexport default () => Foo;"),
    ]);
    assert_eq!(
        resolve("./Foo", "/App.jsx", &files),
        ResolvedSpecifier::Local("/Foo.jsx".to_string())
    );

    let mut session = session();
    session.recompile(&files);
    let app = session.registry().module("/App.jsx").unwrap();
    let foo = session.registry().reference("/Foo.jsx").unwrap();
    assert!(app.code.contains(foo.as_str()));
}

#[test]
fn unresolvable_import_keeps_previous_preview() {
    let mut session = session();
    let mut files = project();
    session.recompile(&files);
    let rendered = session.document().unwrap().clone();

    files.insert_file(
        "/App.jsx",
        "import Missing from '@/Missing';\nexport default () => <Missing/>;",
    );
    let outcome = session.recompile(&files);
    assert_eq!(
        outcome,
        ApplyOutcome::Failed(CompileError::Resolution {
            specifier: "@/Missing".to_string(),
            importer: "/App.jsx".to_string(),
        })
    );
    let message = session.last_error().unwrap().to_string();
    assert!(message.contains("@/Missing"));
    assert!(message.contains("/App.jsx"));

    assert_eq!(session.document(), Some(&rendered));
    let entry_ref = session.import_map().get("/App.jsx").unwrap();
    assert!(session.dereference(entry_ref).is_some());
}

#[test]
fn stylesheets_are_ordered_by_path() {
    let files = FileSet::from_files([("/b.css", ".b{color:blue}"), ("/a.css", ".a{color:red}")]);
    let css = styles::aggregate(&files);
    let a = css.find(".a{color:red}").unwrap();
    let b = css.find(".b{color:blue}").unwrap();
    assert!(a < b);
}

#[test]
fn edited_module_reference_is_released_once() {
    let mut session = session();
    let mut files = project();
    session.recompile(&files);

    let old = session.registry().reference("/lib/label.ts").unwrap().clone();
    let released_before = session.registry().stats().released;

    files.insert_file(
        "/lib/label.ts",
        "export const label = (s: string): string => s.toLowerCase();",
    );
    assert!(matches!(session.recompile(&files), ApplyOutcome::Applied(_)));

    let registry = session.registry();
    assert!(registry.dereference(old.as_str()).is_none());
    assert_ne!(registry.reference("/lib/label.ts"), Some(&old));

    // label.ts, its importer Header.tsx, and App.jsx which imports Header.
    assert_eq!(registry.stats().released - released_before, 3);

    // Nothing reachable from the new import map points at stale code.
    for module in registry.modules() {
        assert!(!module.code.contains(old.as_str()));
    }
    for target in session.import_map().imports.values() {
        if target.starts_with("/@blob/") {
            assert!(session.dereference(target).is_some());
        }
    }
}

#[test]
fn end_to_end_scenario() {
    let files = FileSet::from_files([
        ("/App.jsx", "export default () => <div className='x'>hi</div>"),
        ("/styles.css", ".x{color:red}"),
    ]);
    let mut session = session();
    assert!(matches!(session.recompile(&files), ApplyOutcome::Applied(_)));

    let map = session.import_map();
    let local: Vec<&String> = map
        .imports
        .values()
        .filter(|v| v.starts_with("/@blob/"))
        .collect();
    assert_eq!(session.registry().len(), 1);
    assert!(local.iter().all(|v| **v == local[0].as_str()));
    assert!(map.get("/App.jsx").is_some());

    let document = session.document().unwrap();
    assert!(document.html.contains(".x{color:red}"));
    assert!(document.html.contains("<script type=\"importmap\">"));
    assert!(session.runtime_errors().is_empty());

    let (mut host, mut sandbox) = channel();
    render(document, &mut host);
    match sandbox.try_recv() {
        Some(HostMessage::Document { version, html }) => {
            assert_eq!(version, document.version);
            assert_eq!(html, document.html);
        }
        None => panic!("document was not delivered"),
    }
}

#[test]
fn stale_pass_never_overwrites_newer_preview() {
    let mut session = session();
    let pipeline = session.pipeline().clone();

    let first = project();
    let mut second = project();
    second.insert_file("/styles.css", "h1 { color: orange; }");

    let t1 = session.request();
    let t2 = session.request();
    let r2 = pipeline.build(&second);
    let r1 = pipeline.build(&first);

    assert!(matches!(session.apply(t2, r2), ApplyOutcome::Applied(_)));
    assert_eq!(session.apply(t1, r1), ApplyOutcome::Stale);
    assert!(session.document().unwrap().html.contains("orange"));
}

#[test]
fn runtime_errors_are_attributed_to_files() {
    let mut session = session();
    session.recompile(&project());
    let document = session.document().unwrap().clone();
    let header_ref = session
        .registry()
        .reference("/components/Header.tsx")
        .unwrap()
        .to_string();

    let json = format!(
        r#"{{"source":"livepreview","type":"runtime-error","version":{},"message":"x is undefined","stack":"TypeError: x is undefined\n    at Header (http://127.0.0.1:5173{header_ref}:4:12)","location":null}}"#,
        document.version
    );
    let SandboxMessage::RuntimeError(mut error) = SandboxMessage::from_json(&json).unwrap();
    assert!(error.location.is_none());
    error.location = Some(SourceLocation {
        file: format!("http://127.0.0.1:5173{header_ref}"),
        line: Some(4),
        column: Some(12),
    });
    assert!(session.record_runtime_error(error));
    let recorded = &session.runtime_errors()[0];
    assert_eq!(recorded.location.as_ref().unwrap().file, "/components/Header.tsx");
    assert_eq!(recorded.to_string(), "x is undefined (/components/Header.tsx:4:12)");
}

#[test]
fn memory_file_system_drives_recompiles() {
    let fs = MemoryFileSystem::new(project());
    let mut changes = fs.subscribe();
    let mut session = session();
    session.recompile(&fs.snapshot());
    let v1 = session.document().unwrap().version;

    fs.apply(FsOperation::Rename {
        from: "/lib/label.ts".to_string(),
        to: "/lib/text.ts".to_string(),
    })
    .unwrap();
    assert!(changes.has_changed().unwrap());
    assert_eq!(*changes.borrow_and_update(), 1);

    // The importer still points at the old name.
    assert!(matches!(
        session.recompile(&fs.snapshot()),
        ApplyOutcome::Failed(CompileError::Resolution { .. })
    ));
    assert_eq!(session.document().unwrap().version, v1);

    fs.apply(FsOperation::Edit {
        path: "/components/Header.tsx".to_string(),
        content: "import { label } from '../lib/text';\nexport default () => <h1>{label('x')}</h1>;"
            .to_string(),
    })
    .unwrap();
    assert!(matches!(session.recompile(&fs.snapshot()), ApplyOutcome::Applied(_)));
    assert!(session.registry().contains("/lib/text.ts"));
    assert!(!session.registry().contains("/lib/label.ts"));
}
