//! Offline evaluation over a gold set, end to end: gold JSON in, strategy
//! run, confusion matrix out.

mod common;

use common::{harness, house};
use griya::abtest::SearchMethod;
use griya::eval::runner::MethodRunner;
use griya::eval::{Evaluator, GoldFile, run_gold_set};

const GOLD_JSON: &str = r#"{
    "threshold_t": 0.6,
    "price_tolerance": 0.0,
    "questions": [
        {
            "id": 1,
            "question": "rumah dijual di sunggal harga di bawah 1.5M",
            "category": "price_filter",
            "expected_result": "has_data",
            "constraints": {
                "property_type": "rumah",
                "listing_type": "dijual",
                "price": {"max": 1500000000},
                "location": {"keywords": ["sunggal"]}
            }
        },
        {
            "id": 2,
            "question": "kastil harga 100 juta di medan",
            "category": "negative",
            "expected_result": "no_data",
            "constraints": {
                "price": {"max": 100000000}
            }
        }
    ]
}"#;

#[tokio::test]
async fn confusion_matrix_over_a_two_question_gold_set() {
    // Three affordable houses in Sunggal; nothing under 100 juta.
    let corpus = vec![
        house(1, "sunggal-1", 900_000_000.0, 3.0, "Sunggal"),
        house(2, "sunggal-2", 1_100_000_000.0, 3.0, "Sunggal"),
        house(3, "sunggal-3", 1_400_000_000.0, 4.0, "Sunggal"),
        house(4, "mahal", 5_000_000_000.0, 5.0, "Polonia"),
    ];
    let harness = harness(corpus, false).await;

    let gold = GoldFile::from_json(GOLD_JSON).unwrap();
    let evaluator = Evaluator::for_gold_file(&gold, 0.6, 0.0);
    let runner = MethodRunner::new(harness.retriever.clone(), SearchMethod::ApiOnly, 5);

    let evaluations = run_gold_set(&gold, &runner, &evaluator).await;
    assert_eq!(evaluations.len(), 2);

    let q1 = &evaluations[0];
    assert!(q1.has_results);
    assert_eq!(q1.num_properties(), 3);
    assert!(q1.mean_cpr() >= 0.6, "mean CPR {}", q1.mean_cpr());

    let q2 = &evaluations[1];
    assert!(!q2.has_results);

    let metrics = evaluator.calculate_metrics(&evaluations);
    assert_eq!(metrics.confusion_matrix.tp, 1);
    assert_eq!(metrics.confusion_matrix.tn, 1);
    assert_eq!(metrics.confusion_matrix.fp, 0);
    assert_eq!(metrics.confusion_matrix.fn_, 0);
    assert_eq!(metrics.precision, 1.0);
    assert_eq!(metrics.recall, 1.0);
    assert_eq!(metrics.f1, 1.0);
    assert_eq!(metrics.accuracy, 1.0);
    assert_eq!(metrics.query_success_rate, 1.0);
}

#[tokio::test]
async fn strategies_can_be_compared_on_the_same_gold_set() {
    let mut corpus = vec![
        house(1, "sunggal-1", 900_000_000.0, 3.0, "Sunggal"),
        house(2, "sunggal-2", 1_100_000_000.0, 3.0, "Sunggal"),
    ];
    corpus[0].description = Some("Rumah dengan taman hijau".to_string());
    corpus[1].description = Some("Rumah strategis".to_string());
    let harness = harness(corpus, true).await;

    let gold = GoldFile::from_json(GOLD_JSON).unwrap();
    let evaluator = Evaluator::for_gold_file(&gold, 0.6, 0.0);

    for method in [SearchMethod::ApiOnly, SearchMethod::Hybrid] {
        let runner = MethodRunner::new(harness.retriever.clone(), method, 5);
        let evaluations = run_gold_set(&gold, &runner, &evaluator).await;
        let metrics = evaluator.calculate_metrics(&evaluations);
        // Both strategies satisfy this easy gold set; the harness exists to
        // compare their metrics side by side.
        assert_eq!(metrics.total_queries, 2);
        assert_eq!(metrics.confusion_matrix.fp, 0);
    }
}

#[test]
fn gold_file_category_breakdown() {
    let gold = GoldFile::from_json(GOLD_JSON).unwrap();
    assert_eq!(gold.questions.len(), 2);
    assert_eq!(gold.questions[0].category, "price_filter");
    assert_eq!(gold.threshold_t, Some(0.6));
}
