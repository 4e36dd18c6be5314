use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use scheme_search_core::{
    Benefits, BenefitsType, CharacterNgramEmbedder, EmbeddingClient, InMemorySchemeRepository,
    IngestionOptions, IngestionPipeline, LopdfExtractor, NewScheme, RetrievalOptions,
    RetrievalService, RetryPolicy, SchemeError, SchemeFilters, SearchRequest, UploadRequest,
    UserProfile,
};
use std::sync::Arc;

fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let encoded = content.encode().expect("content encodes");
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf serializes");
    bytes
}

fn services() -> (IngestionPipeline, RetrievalService, Arc<InMemorySchemeRepository>) {
    let repository = Arc::new(InMemorySchemeRepository::new());
    let embeddings =
        EmbeddingClient::new(Arc::new(CharacterNgramEmbedder::default())).with_retry(RetryPolicy::none());

    let pipeline = IngestionPipeline::new(
        Arc::new(LopdfExtractor),
        embeddings.clone(),
        repository.clone(),
        IngestionOptions::default(),
    );
    let retrieval = RetrievalService::new(embeddings, repository.clone(), RetrievalOptions::default());
    (pipeline, retrieval, repository)
}

fn upload(name: &str, bytes: Vec<u8>, states: &[&str]) -> UploadRequest {
    UploadRequest {
        file: Some(bytes),
        file_name: Some(format!("{}.pdf", name.to_lowercase().replace(' ', "_"))),
        scheme_name: Some(name.to_string()),
        benefits_type: BenefitsType::Financial,
        benefits_value: 5000.0,
        benefits_description: "Annual income support".to_string(),
        required_documents: vec!["Aadhaar".to_string()],
        filters: SchemeFilters {
            state: states.iter().map(|state| (*state).to_string()).collect(),
            ..SchemeFilters::default()
        },
    }
}

#[tokio::test]
async fn uploaded_scheme_is_found_by_search() -> Result<(), SchemeError> {
    let (pipeline, retrieval, _) = services();
    let bytes = pdf_with_pages(&[
        "PM Test Yojana provides benefits to small farmers",
        "Eligible applicants receive 5000 rupees every year",
        "Apply with Aadhaar and land records",
    ]);

    let outcome = pipeline
        .ingest_upload(upload("PM Test Yojana", bytes, &[]).validate()?)
        .await?;
    assert!(outcome.is_searchable());
    assert!(outcome.scheme.original_source_ref.starts_with("sha256:"));
    assert_eq!(
        outcome.scheme.benefits,
        Benefits {
            kind: BenefitsType::Financial,
            max_value: 5000.0,
            description: "Annual income support".to_string(),
        }
    );

    let hits = retrieval
        .search(&SearchRequest::new("PM Test Yojana benefits"))
        .await?;

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].scheme.id, outcome.scheme.id);
    assert!(hits[0].snippet.contains("Yojana"));
    assert!((1..=3).contains(&hits[0].source_page));
    Ok(())
}

#[tokio::test]
async fn state_restricted_scheme_is_hidden_from_other_states() -> Result<(), SchemeError> {
    let (pipeline, retrieval, _) = services();

    pipeline
        .ingest_upload(
            upload(
                "Punjab Kisan Scheme",
                pdf_with_pages(&["Crop insurance for farmers in Punjab"]),
                &["Punjab"],
            )
            .validate()?,
        )
        .await?;
    pipeline
        .ingest_upload(
            upload(
                "National Crop Scheme",
                pdf_with_pages(&["Crop insurance for farmers across India"]),
                &["Pan-India"],
            )
            .validate()?,
        )
        .await?;

    let kerala = UserProfile {
        state: Some("Kerala".to_string()),
        ..UserProfile::default()
    };
    let hits = retrieval
        .search(&SearchRequest::new("crop insurance for farmers").with_profile(kerala))
        .await?;
    let names: Vec<&str> = hits.iter().map(|hit| hit.scheme.name.as_str()).collect();
    assert_eq!(names, vec!["National Crop Scheme"]);

    let punjab = UserProfile {
        state: Some("Punjab".to_string()),
        ..UserProfile::default()
    };
    let hits = retrieval
        .search(&SearchRequest::new("crop insurance for farmers").with_profile(punjab))
        .await?;
    assert_eq!(hits.len(), 2);
    Ok(())
}

#[tokio::test]
async fn corrupt_upload_leaves_the_repository_untouched() -> Result<(), SchemeError> {
    let (pipeline, retrieval, _) = services();

    let result = pipeline
        .ingest(
            b"%PDF-1.4 this is not really a pdf".to_vec(),
            NewScheme {
                name: "Broken".to_string(),
                ..NewScheme::default()
            },
        )
        .await;

    assert!(matches!(result, Err(SchemeError::Extraction(_))));
    assert!(retrieval.list_schemes().await?.is_empty());
    Ok(())
}
