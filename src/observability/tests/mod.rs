mod correlation_tests;
