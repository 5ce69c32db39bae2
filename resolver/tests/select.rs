mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::*;
use resolver::store::{self, MemoryStore};
use resolver::{DiskCache, ResolveError, index_tree, standardize_identifier};
use rtext::tree::{BlockKind, NodeKind, Param};
use rtext::{Document, NodeId, Parser};
use tempfile::TempDir;

fn select_of(doc: &Document) -> NodeId {
    doc.tree
        .walk_pre(&doc.roots)
        .into_iter()
        .find(|&id| matches!(doc.tree[id].kind, NodeKind::Select { .. }))
        .expect("no select directive")
}

// ---------------------------------------------------------------------------
// Identifier index
// ---------------------------------------------------------------------------

#[test]
fn identifiers_are_standardized() {
    assert_eq!(standardize_identifier("a b, (c)"), "a_b;_c");
    assert_eq!(standardize_identifier("  plain  "), "plain");
}

#[test]
fn duplicate_identifiers_get_numeric_suffixes() {
    let doc = Parser::new(
        "S\n====\n:comment: dup\n   one\n\n:comment: dup\n   two\n\n:comment: dup\n   three\n".to_string(),
        0,
    )
    .parse()
    .unwrap();
    let (index, _) = index_tree(&doc.tree, &doc.roots);
    let first = index.get("dup").unwrap();
    let second = index.get("dup.2").unwrap();
    let third = index.get("dup.3").unwrap();
    assert_eq!(doc.tree[first].text, vec!["one", ""]);
    assert_eq!(doc.tree[second].text, vec!["two", ""]);
    assert_eq!(doc.tree[third].text, vec!["three"]);
}

#[test]
fn concept_keys_and_templates() {
    let source = "\
Force
=====
:defines: force

:intro:
   Pushes and pulls.

.. glossary::

   net force
      Sum of all forces.

Proof
=====
:proves: force

:format: card
   {{ this.text }}
";
    let doc = Parser::new(source.to_string(), 0).parse().unwrap();
    let (index, formats) = index_tree(&doc.tree, &doc.roots);
    assert_eq!(index.get("force.definition"), Some(doc.roots[0]));
    assert_eq!(index.get("force.proof"), Some(doc.roots[1]));
    let intro = index.get("force.intro").unwrap();
    assert_eq!(doc.tree[intro].block_kind(), Some(BlockKind::Intro));
    let entry = index.get("glossary.net force").unwrap();
    assert_eq!(doc.tree[entry].text, vec!["Sum of all forces."]);
    assert_eq!(formats.get("card").map(String::as_str), Some("{{ this.text }}"));
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

#[test]
fn plain_ids_are_replaced_by_bound_copies() {
    let (dir, lecture) = fixture(
        "Lecture\n=======\n.. select:: bank.rst\n   * q1 format=slide tag=first\n   * q2\n",
    );
    let mut resolver = resolver_in(dir.path());
    let output = render_file(&mut resolver, &lecture);
    assert!(
        output.starts_with("Lecture\n-------\nQ: What is F for m=2, a=3? [first] (6)\nIs force a vector?\n"),
        "{output}"
    );
    // the unformatted copy keeps its answer block
    assert_eq!(output.trim_end().lines().last(), Some("Yes"));
    assert!(resolver.warnings().is_empty());
}

#[test]
fn parameters_stay_with_each_copy() {
    let (dir, lecture) = fixture(
        "L\n====\n.. select:: bank.rst\n   * q1 format=slide tag=first\n   * q1 format=slide tag=second\n",
    );
    let mut resolver = resolver_in(dir.path());
    let doc = resolver.process_select(&lecture).unwrap();
    let select = select_of(&doc);
    let copies = &doc.tree[select].children;
    assert_ne!(copies[0], copies[1]);
    let tag = |id: NodeId| doc.tree[id].binding.as_ref().unwrap().text("tag").map(str::to_string);
    assert_eq!(tag(copies[0]).as_deref(), Some("first"));
    assert_eq!(tag(copies[1]).as_deref(), Some("second"));
    assert_eq!(doc.tree[copies[0]].id.as_deref(), Some("q1"));

    let output = resolver::Renderer::default().render(&doc.tree, &doc.roots).unwrap();
    assert!(output.contains("[first]"), "{output}");
    assert!(output.contains("[second]"), "{output}");
}

#[test]
fn editing_a_copy_leaves_the_indexed_node_alone() {
    let (dir, lecture) = fixture("L\n====\n.. select:: bank.rst\n   * q1 format=slide tag=x\n");
    let mut resolver = resolver_in(dir.path());
    let mut doc = resolver.process_select(&lecture).unwrap();
    let copy = doc.tree[select_of(&doc)].children[0];
    let original = doc
        .tree
        .ids()
        .find(|&id| doc.tree[id].id.as_deref() == Some("q1") && doc.tree[id].binding.is_none())
        .expect("indexed q1 in the session tree");
    assert_ne!(copy, original);

    let metadata = doc.tree[original].metadata.clone();
    let children = doc.tree[original].children.clone();
    assert!(!children.is_empty());

    {
        let node = &mut doc.tree[copy];
        node.binding
            .as_mut()
            .unwrap()
            .params
            .insert("extra".to_string(), Param::Text("1".to_string()));
        node.metadata.push(":added: yes".to_string());
        node.children.clear();
    }

    assert!(doc.tree[original].binding.is_none());
    assert_eq!(doc.tree[original].metadata, metadata);
    assert_eq!(doc.tree[original].children, children);
    assert_eq!(doc.tree[copy].binding.as_ref().unwrap().text("extra"), Some("1"));
}

#[test]
fn list_and_dict_targets_bind_nodes() {
    let (dir, lecture) = fixture(
        "L\n====\n.. select:: bank.rst\n   * [q1,q2] format=pair\n   * (pro=[q1],con=q2) format=duel\n",
    );
    let mut resolver = resolver_in(dir.path());
    let doc = resolver.process_select(&lecture).unwrap();
    let select = select_of(&doc);
    let items = &doc.tree[select].children;
    assert!(matches!(doc.tree[items[0]].kind, NodeKind::Reference { .. }));
    let binding = doc.tree[items[0]].binding.as_ref().unwrap();
    assert!(matches!(binding.params.get("sources"), Some(Param::Nodes(nodes)) if nodes.len() == 2));
    let dict = doc.tree[items[1]].binding.as_ref().unwrap();
    assert!(matches!(dict.params.get("con"), Some(Param::Node(_))));

    let output = resolver::Renderer::default().render(&doc.tree, &doc.roots).unwrap();
    assert_eq!(output, "L\n-\nq1;q2;\nq1 vs q2");
}

#[test]
fn unknown_identifier_names_id_and_source() {
    let (dir, lecture) = fixture("L\n====\n.. select:: bank.rst\n   * nope\n");
    let mut resolver = resolver_in(dir.path());
    match resolver.process_select(&lecture) {
        Err(ResolveError::UnknownId { id, origin }) => {
            assert_eq!(id, "nope");
            assert!(origin.ends_with("bank.rst"), "{origin}");
        }
        other => panic!("expected an unknown id error, got {other:?}"),
    }
}

#[test]
fn malformed_target_fails() {
    let (dir, lecture) = fixture("L\n====\n.. select:: bank.rst\n   * [q1,q2\n");
    let mut resolver = resolver_in(dir.path());
    let err = resolver.process_select(&lecture).unwrap_err();
    assert!(matches!(err, ResolveError::Reference(_)), "{err}");
}

#[test]
fn parse_errors_in_a_loaded_source_name_the_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "broken.rst", "A\n====\nB\n----\nC\n~~~~\nD\n====\nE\n~~~~\n");
    let lecture = write(dir.path(), "lecture.rst", "L\n====\n.. select:: broken.rst\n   * x\n");
    let mut resolver = resolver_in(dir.path());
    let err = resolver.process_select(&lecture).unwrap_err();
    assert!(err.to_string().contains("broken.rst"), "{err}");
    assert_eq!(err.parse_errors().len(), 1);
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[test]
fn source_is_loaded_once_per_session() {
    let (dir, lecture) = fixture(
        "L\n====\n.. select:: bank.rst\n   * q1\n\nM\n====\n.. select:: ./bank.rst\n   * q2\n",
    );
    let mut resolver = resolver_in(dir.path());
    resolver.process_select(&lecture).unwrap();
    assert_eq!(resolver.files().len(), 2);
}

#[test]
fn loaded_sources_resolve_their_own_selects() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "bank.rst", BANK);
    write(
        dir.path(),
        "mid/mid.rst",
        "Mid\n====\n:question: combo\n   Combined\n\n   .. select:: ../bank.rst\n      * q1\n",
    );
    let lecture = write(dir.path(), "lecture.rst", "L\n====\n.. select:: mid/mid.rst\n   * combo\n");
    let mut resolver = resolver_in(dir.path());
    let doc = resolver.process_select(&lecture).unwrap();

    let combo = doc.tree[select_of(&doc)].children[0];
    assert_eq!(doc.tree[combo].id.as_deref(), Some("combo"));
    let nested = doc.tree[combo].children[0];
    assert_eq!(
        doc.tree[nested].kind,
        NodeKind::Select {
            source: "../bank.rst".to_string(),
            resolved: true,
        }
    );
    let q1 = doc.tree[nested].children[0];
    assert_eq!(doc.tree[q1].id.as_deref(), Some("q1"));
}

#[test]
fn selects_nested_in_blocks_are_resolved() {
    let (dir, lecture) = fixture(
        "L\n====\n:question: outer\n   Intro text\n\n   .. select:: bank.rst\n      * q2\n",
    );
    let mut resolver = resolver_in(dir.path());
    let output = render_file(&mut resolver, &lecture);
    assert!(output.starts_with("L\n-\nIntro text\n\nIs force a vector?\n"), "{output}");
    assert_eq!(output.trim_end().lines().last(), Some("Yes"));
}

#[test]
fn selected_sections_keep_their_child_blocks() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "bank.rst",
        "Topic\n=====\n:ID: topic\n\nTopic text.\n\n:question: inner\n   Inner question?\n\n   :answer:\n      Inner answer\n",
    );
    let lecture = write(dir.path(), "lecture.rst", "L\n====\n.. select:: bank.rst\n   * topic\n");
    let mut resolver = resolver_in(dir.path());
    let output = render_file(&mut resolver, &lecture);
    assert!(output.contains("Topic text."), "{output}");
    assert!(output.contains("Inner question?"), "{output}");
    assert!(output.contains("Inner answer"), "{output}");
}

#[test]
fn select_cycles_warn_and_leave_the_directive() {
    let dir = TempDir::new().unwrap();
    let a = write(
        dir.path(),
        "a.rst",
        "A\n====\n:comment: a1\n   from a\n\n.. select:: b.rst\n   * b1\n",
    );
    write(
        dir.path(),
        "b.rst",
        "B\n====\n.. select:: a.rst\n   * a1\n\n:comment: b1\n   from b\n",
    );
    let mut resolver = resolver_in(dir.path());
    let output = render_file(&mut resolver, &a);
    assert!(output.contains("from a"), "{output}");
    assert!(output.contains("from b"), "{output}");

    let warnings = resolver.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("cycle"), "{}", warnings[0].message);
    assert!(warnings[0].message.contains("a.rst"), "{}", warnings[0].message);
    assert!(resolver.warnings().is_empty());
}

#[test]
fn blocked_select_keeps_its_text_and_loses_its_items() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.rst", "A\n====\n.. select:: a.rst\n   * x\n");
    let mut resolver = resolver_in(dir.path());
    let doc = resolver.process_select(&a).unwrap();
    let select = select_of(&doc);
    assert!(doc.tree[select].children.is_empty());
    let output = resolver::Renderer::default().render(&doc.tree, &doc.roots).unwrap();
    assert_eq!(output, "A\n-\n.. select:: a.rst\n   * x");
    assert_eq!(resolver.warnings().len(), 1);
}

#[test]
fn directory_sources_skip_ignored_subtrees() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "bank/one.rst", "One\n====\n:comment: x1\n   first\n");
    write(dir.path(), "bank/skip/.rust_ignore", "");
    write(dir.path(), "bank/skip/two.rst", "Two\n====\n:comment: x2\n   second\n");
    write(dir.path(), "bank/notes.txt", "not structured text");

    let lecture = write(dir.path(), "lecture.rst", "L\n====\n.. select:: bank\n   * x1\n");
    let mut resolver = resolver_in(dir.path());
    assert_eq!(render_file(&mut resolver, &lecture), "L\n-\nfirst");

    let hidden = write(dir.path(), "hidden.rst", "L\n====\n.. select:: bank\n   * x2\n");
    let err = resolver_in(dir.path()).process_select(&hidden).unwrap_err();
    assert!(matches!(err, ResolveError::UnknownId { .. }), "{err}");
}

#[test]
fn resolving_twice_changes_nothing() {
    let (dir, lecture) = fixture("L\n====\n.. select:: bank.rst\n   * q1 format=slide tag=t\n");
    let mut resolver = resolver_in(dir.path());
    let mut doc = resolver.process_select(&lecture).unwrap();
    let renderer = resolver::Renderer::default();
    let first = renderer.render(&doc.tree, &doc.roots).unwrap();
    let size = doc.tree.len();
    resolver.resolve(&mut doc).unwrap();
    assert_eq!(doc.tree.len(), size);
    assert_eq!(renderer.render(&doc.tree, &doc.roots).unwrap(), first);
}

// ---------------------------------------------------------------------------
// Other source kinds
// ---------------------------------------------------------------------------

#[test]
fn store_sources_read_nodes_and_templates() {
    let bank = Parser::new(BANK.to_string(), 0).parse().unwrap();
    let mut memory = MemoryStore::new();
    let saved = store::save_docs(&mut memory, "bank", &bank.tree, &bank.roots, 0).unwrap();
    assert_eq!(saved, 4);
    let (_, formats) = index_tree(&bank.tree, &bank.roots);
    store::save_formats(&mut memory, &formats).unwrap();

    let dir = TempDir::new().unwrap();
    let lecture = write(
        dir.path(),
        "lecture.rst",
        "L\n====\n.. select:: store:bank\n   * q1 format=slide tag=db\n",
    );
    let mut resolver = resolver_in(dir.path()).with_store(Box::new(memory));
    assert_eq!(
        render_file(&mut resolver, &lecture),
        "L\n-\nQ: What is F for m=2, a=3? [db] (6)"
    );
}

#[test]
fn store_sources_need_a_store() {
    let dir = TempDir::new().unwrap();
    let lecture = write(dir.path(), "lecture.rst", "L\n====\n.. select:: store:bank\n   * q1\n");
    let err = resolver_in(dir.path()).process_select(&lecture).unwrap_err();
    assert!(matches!(err, ResolveError::NoStore(_)), "{err}");
}

#[test]
fn stored_documents_split_out_questions() {
    let bank = Parser::new(BANK.to_string(), 0).parse().unwrap();
    let docs = store::extract_docs(&bank.tree, &bank.roots, 0);
    let kinds: Vec<&str> = docs.iter().map(|d| d.node.kind.as_str()).collect();
    assert_eq!(kinds, vec!["question", "question", "question", "section"]);
    assert_eq!(docs[2].node.title.as_deref(), Some("Colors"));
    let section = &docs[3];
    assert!(section.node.children.iter().all(|c| c.kind != "question"));
    assert!(section.content.contains("Force is mass times acceleration."));
}

#[test]
fn page_selections_use_the_includepdf_template() {
    let dir = TempDir::new().unwrap();
    let slides = write(dir.path(), "slides.odp", "binary");
    let lecture = write(dir.path(), "lecture.rst", "L\n====\n.. select:: slides.odp\n   * 2-3\n");
    let cache = RecordingCache::default();
    let converted = cache.converted.clone();
    let mut resolver = resolver_in(dir.path()).with_cache(Box::new(cache));
    let output = render_file(&mut resolver, &lecture);

    assert_eq!(converted.borrow().as_slice(), &[slides.clone()]);
    let pdf = slides.with_extension("pdf");
    assert!(
        output.contains(&format!("\\includepdf[2-3]{{{}}}", pdf.display())),
        "{output}"
    );
    assert!(output.contains("%%rst2beamer:endframe"), "{output}");
}

#[test]
fn pdf_files_are_selected_without_conversion() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "notes.pdf", "%PDF");
    let lecture = write(dir.path(), "lecture.rst", "L\n====\n.. select:: notes.pdf\n   * 1\n");
    let cache = RecordingCache::default();
    let converted = cache.converted.clone();
    let mut resolver = resolver_in(dir.path()).with_cache(Box::new(cache));
    let output = render_file(&mut resolver, &lecture);
    assert!(converted.borrow().is_empty());
    assert!(output.contains("notes.pdf}"), "{output}");
}

#[test]
fn remote_sources_are_downloaded_then_loaded() {
    let dir = TempDir::new().unwrap();
    let calls = Rc::new(Cell::new(0));
    let cache = DiskCache::new(
        dir.path().join("_downloaded"),
        dir.path().join("_converted_pdf"),
        Box::new(FakeFetcher {
            body: Ok(BANK.to_string()),
            calls: calls.clone(),
        }),
        Box::new(FakeConverter {
            fail: true,
            produce: false,
            calls: Rc::new(Cell::new(0)),
        }),
    );
    let lecture = write(
        dir.path(),
        "lecture.rst",
        "L\n====\n.. select:: https://example.org/course/bank.rst\n   * q1 format=slide tag=web\n",
    );
    let mut resolver = resolver_in(dir.path()).with_cache(Box::new(cache));
    assert_eq!(
        render_file(&mut resolver, &lecture),
        "L\n-\nQ: What is F for m=2, a=3? [web] (6)"
    );
    assert_eq!(calls.get(), 1);
    assert!(dir.path().join("_downloaded/bank.rst").is_file());
}

#[test]
fn downloaded_pdfs_are_selected_as_pages() {
    let dir = TempDir::new().unwrap();
    let converted = Rc::new(Cell::new(0));
    let cache = DiskCache::new(
        dir.path().join("_downloaded"),
        dir.path().join("_converted_pdf"),
        Box::new(FakeFetcher {
            body: Ok("%PDF".to_string()),
            calls: Rc::new(Cell::new(0)),
        }),
        Box::new(FakeConverter {
            fail: true,
            produce: false,
            calls: converted.clone(),
        }),
    );
    let lecture = write(
        dir.path(),
        "lecture.rst",
        "L\n====\n.. select:: https://example.org/handout.pdf\n   * 4\n",
    );
    let mut resolver = resolver_in(dir.path()).with_cache(Box::new(cache));
    let output = render_file(&mut resolver, &lecture);
    assert_eq!(converted.get(), 0);
    assert!(output.contains("\\includepdf[4]"), "{output}");
    assert!(output.contains("handout.pdf}"), "{output}");
}

#[test]
fn failed_downloads_name_the_url() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::new(
        dir.path().join("_downloaded"),
        dir.path().join("_converted_pdf"),
        Box::new(FakeFetcher {
            body: Err("404".to_string()),
            calls: Rc::new(Cell::new(0)),
        }),
        Box::new(FakeConverter {
            fail: true,
            produce: false,
            calls: Rc::new(Cell::new(0)),
        }),
    );
    let lecture = write(
        dir.path(),
        "lecture.rst",
        "L\n====\n.. select:: https://example.org/missing.rst\n   * q1\n",
    );
    let err = resolver_in(dir.path())
        .with_cache(Box::new(cache))
        .process_select(&lecture)
        .unwrap_err();
    match err {
        ResolveError::Download { url, .. } => assert_eq!(url, "https://example.org/missing.rst"),
        other => panic!("expected a download error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Documents and templates
// ---------------------------------------------------------------------------

#[test]
fn several_files_parse_into_one_document() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.rst", "A\n====\nfirst\n");
    let b = write(dir.path(), "b.rst", "B\n====\nsecond\n");
    let mut resolver = resolver_in(dir.path());
    let doc = resolver.parse_files(&[a, b]).unwrap();

    assert_eq!(doc.roots.len(), 2);
    assert_eq!(doc.source_id, 0);
    assert_eq!(doc.tree[doc.roots[0]].source_id, 0);
    assert_eq!(doc.tree[doc.roots[1]].source_id, 1);
    assert_eq!(resolver.files().len(), 2);
    assert_eq!(
        resolver::Renderer::default().render(&doc.tree, &doc.roots).unwrap(),
        "A\n-\nfirst\nB\n-\nsecond"
    );
}

#[test]
fn formats_documents_yield_their_templates() {
    let dir = TempDir::new().unwrap();
    let bank = write(dir.path(), "bank.rst", BANK);
    let formats = resolver_in(dir.path()).read_formats(&bank).unwrap();
    let names: Vec<&str> = formats.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["duel", "pair", "slide"]);
    assert_eq!(formats["pair"], "{% for s in sources %}{{ s.id }};{% endfor %}");
}
