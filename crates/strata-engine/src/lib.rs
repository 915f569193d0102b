pub mod providers;
pub mod registry;

pub use providers::backend_providers;
pub use registry::{BuildContext, Component, Engine, EngineError, FrontendHandle, Provider};

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use strata_config::parse_blueprint_yaml;
    use strata_core::{Context, FileSystem as _, ReadOptions, WriteOptions};

    use super::{Engine, EngineError, backend_providers};

    fn engine() -> Engine {
        let mut engine = Engine::new();
        for provider in backend_providers() {
            engine.register(provider);
        }
        engine
    }

    #[tokio::test]
    async fn wires_a_union_over_memory_backends() {
        let specs = parse_blueprint_yaml(
            r#"
- name: a
  type: backend.memory
- name: b
  type: backend.memory
- name: root
  type: backend.union
  config:
    items:
      - backend: a
        mountPath: /
        readOnly: true
      - backend: b
        mountPath: /b
"#,
        )
        .unwrap();

        let mut engine = engine();
        engine.load(&specs).await.unwrap();

        let root = engine.backend("root").unwrap();
        let ctx = Context::new();
        root.write_bytes(
            &ctx,
            &"/b/x".parse().unwrap(),
            Bytes::from_static(b"x"),
            WriteOptions::default(),
        )
        .await
        .unwrap();
        let b = engine.backend("b").unwrap();
        let data = b
            .read_bytes(&ctx, &"/x".parse().unwrap(), ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(&data[..], b"x");

        // Dependency edges were recorded for each lookup.
        let edges = engine.dependency_edges();
        assert!(edges.contains(&("root".to_string(), "a".to_string())));
        assert!(edges.contains(&("root".to_string(), "b".to_string())));

        engine.dispose().await;
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let specs = parse_blueprint_yaml(
            r#"
- name: a
  type: backend.memory
- name: a
  type: backend.memory
"#,
        )
        .unwrap();

        let mut engine = engine();
        let err = engine.load(&specs).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyLoaded { .. }), "{err}");
    }

    #[tokio::test]
    async fn unknown_type_fails() {
        let specs = parse_blueprint_yaml("- name: x\n  type: backend.tape\n").unwrap();
        let mut engine = engine();
        let err = engine.load(&specs).await.unwrap_err();
        assert!(matches!(err, EngineError::NoProvider { .. }), "{err}");
    }

    #[tokio::test]
    async fn missing_dependency_fails_at_wire_time() {
        let specs = parse_blueprint_yaml(
            r#"
- name: aliased
  type: backend.alias
  config:
    backend: nowhere
    subDirectory: /sub
"#,
        )
        .unwrap();

        let mut engine = engine();
        let err = engine.load(&specs).await.unwrap_err();
        assert!(matches!(err, EngineError::Build { .. }), "{err}");
    }

    #[tokio::test]
    async fn check_validates_without_building() {
        let specs = parse_blueprint_yaml(
            r#"
- name: data
  type: backend.local
  config:
    baseDir: /srv/data
    typoField: true
"#,
        )
        .unwrap();

        let engine = engine();
        assert!(engine.check(&specs).is_err());
    }
}
